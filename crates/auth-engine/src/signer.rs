//! Request signing for the web service.
//!
//! The signature is `md5(k1 v1 k2 v2 ... secret)` over the parameters sorted
//! by key, rendered as lowercase hex. MD5 is what the provider verifies.

use md5::{Digest, Md5};

/// Compute `api_sig` for a set of request parameters.
///
/// The result does not depend on the iteration order of `params`.
pub fn sign<I, K, V>(params: I, secret: &str) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = params.into_iter().collect();
    pairs.sort_by(|a, b| {
        a.0.as_ref()
            .cmp(b.0.as_ref())
            .then_with(|| a.1.as_ref().cmp(b.1.as_ref()))
    });

    let mut hasher = Md5::new();
    for (key, value) in &pairs {
        hasher.update(key.as_ref().as_bytes());
        hasher.update(value.as_ref().as_bytes());
    }
    hasher.update(secret.as_bytes());

    format!("{:x}", hasher.finalize())
}
