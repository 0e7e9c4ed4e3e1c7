//! Remote web service calls the auth flow needs.
//!
//! Only two methods are used here: `auth.getSession` (token exchange) and
//! `user.getInfo` (a read-only probe to validate a session key). Catalog
//! calls live outside this crate.

use crate::signer::sign;
use crate::{AuthError, AuthResult, Session};
use async_trait::async_trait;
use encore_config_and_utils::Config;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote operations the auth flow depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Trade a browser-issued token for a session.
    async fn exchange_token(&self, token: &str) -> AuthResult<Session>;

    /// Check a session key with one read-only call. Returns the display name.
    async fn validate_session_key(&self, session_key: &str) -> AuthResult<String>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    session: SessionBody,
}

#[derive(Deserialize)]
struct SessionBody {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: UserBody,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    name: String,
}

/// reqwest-backed client for the music web service.
#[derive(Clone)]
pub struct MusicApiClient {
    http_client: reqwest::Client,
    api_root: Url,
    api_key: String,
    shared_secret: String,
}

impl fmt::Debug for MusicApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MusicApiClient")
            .field("api_root", &self.api_root.as_str())
            .field("api_key", &crate::session::redact(&self.api_key))
            .field("shared_secret", &crate::session::REDACTED)
            .finish()
    }
}

impl MusicApiClient {
    pub fn new(
        api_root: Url,
        api_key: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("encore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Config(format!("HTTP client: {}", e.without_url())))?;

        Ok(Self {
            http_client,
            api_root,
            api_key: api_key.into(),
            shared_secret: shared_secret.into(),
        })
    }

    /// Build from configuration. Fails when the API key or secret is missing.
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        config.validate_for_auth()?;
        Self::new(config.api_root()?, &config.api_key, &config.shared_secret)
    }

    /// Provider error codes that mean the session key itself is no longer
    /// accepted (invalid service, authentication failed, unauthorized or
    /// expired token, suspended key).
    pub fn is_invalid_session_code(code: i64) -> bool {
        matches!(code, 4 | 9 | 14 | 15 | 26)
    }

    /// Codes the provider documents as temporary: service offline,
    /// temporary error, rate limit.
    fn is_temporary_code(code: i64) -> bool {
        matches!(code, 11 | 16 | 29)
    }

    /// Signed GET. `format` is excluded from the signature, as the provider
    /// requires.
    async fn signed_get(
        &self,
        method: &'static str,
        extra: &[(&'static str, &str)],
    ) -> AuthResult<serde_json::Value> {
        let mut params: Vec<(&str, &str)> = vec![("method", method), ("api_key", self.api_key.as_str())];
        params.extend(extra.iter().copied());
        let api_sig = sign(params.iter().copied(), &self.shared_secret);
        params.push(("api_sig", api_sig.as_str()));
        params.push(("format", "json"));

        debug!(method, "calling web service");

        let response = self
            .http_client
            .get(self.api_root.clone())
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => {
                if value.get("error").is_some() {
                    let api_error: ApiErrorBody = serde_json::from_value(value).map_err(|_| {
                        AuthError::InvalidResponse(format!("{method}: unreadable error body"))
                    })?;
                    return Err(Self::map_api_error(method, api_error));
                }
                Ok(value)
            }
            Err(_) if status.is_server_error() => Err(AuthError::Network(format!(
                "{method}: server returned {status}"
            ))),
            Err(_) => Err(AuthError::InvalidResponse(format!(
                "{method}: response is not JSON (status {status})"
            ))),
        }
    }

    fn map_api_error(method: &str, api_error: ApiErrorBody) -> AuthError {
        warn!(method, code = api_error.error, "web service returned an error");
        let message = if api_error.message.is_empty() {
            format!("{method} failed with error {}", api_error.error)
        } else {
            format!("{} (error {})", api_error.message, api_error.error)
        };
        if Self::is_temporary_code(api_error.error) {
            AuthError::Network(message)
        } else {
            AuthError::InvalidCredential(message)
        }
    }
}

#[async_trait]
impl SessionApi for MusicApiClient {
    async fn exchange_token(&self, token: &str) -> AuthResult<Session> {
        let value = self.signed_get("auth.getSession", &[("token", token)]).await?;
        let envelope: SessionEnvelope = serde_json::from_value(value).map_err(|_| {
            AuthError::InvalidResponse("auth.getSession: missing session key or name".into())
        })?;
        if envelope.session.key.is_empty() || envelope.session.name.is_empty() {
            return Err(AuthError::InvalidResponse(
                "auth.getSession: empty session key or name".into(),
            ));
        }
        Ok(Session::new(envelope.session.key, envelope.session.name))
    }

    async fn validate_session_key(&self, session_key: &str) -> AuthResult<String> {
        let value = self.signed_get("user.getInfo", &[("sk", session_key)]).await?;
        let envelope: UserEnvelope = serde_json::from_value(value)
            .map_err(|_| AuthError::InvalidResponse("user.getInfo: missing user name".into()))?;
        if envelope.user.name.is_empty() {
            return Err(AuthError::InvalidResponse(
                "user.getInfo: empty user name".into(),
            ));
        }
        Ok(envelope.user.name)
    }
}
