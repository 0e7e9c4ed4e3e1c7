//! The authenticated session value.

use encore_storage::PersistedSessionRecord;
use serde::Serialize;
use std::fmt;

/// Placeholder shown wherever a credential would otherwise be printed.
pub const REDACTED: &str = "[REDACTED]";

/// Render a credential for logs: only its length survives.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "[EMPTY]".to_string()
    } else {
        format!("[REDACTED:{} chars]", secret.chars().count())
    }
}

/// A live session: the key the web service issued and whose it is.
///
/// Both fields are always populated; callers get copies.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    session_key: String,
    display_name: String,
}

impl Session {
    pub fn new(session_key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            display_name: display_name.into(),
        }
    }

    /// The raw session key. Never log this.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_key", &REDACTED)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl From<&Session> for PersistedSessionRecord {
    fn from(session: &Session) -> Self {
        PersistedSessionRecord {
            session_key: session.session_key.clone(),
            display_name: session.display_name.clone(),
        }
    }
}

impl From<PersistedSessionRecord> for Session {
    fn from(record: PersistedSessionRecord) -> Self {
        Session::new(record.session_key, record.display_name)
    }
}

/// What `status()` reports. No credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl AuthStatus {
    pub fn from_session(session: Option<&Session>) -> Self {
        Self {
            authenticated: session.is_some(),
            display_name: session.map(|s| s.display_name.clone()),
        }
    }
}
