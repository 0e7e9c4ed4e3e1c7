//! Authentication error types.
//!
//! Messages carry what went wrong, never a token, session key or signature.

use encore_config_and_utils::CoreError;
use encore_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// The callback listener could not bind its port.
    #[error("could not listen on port {port}: {reason}")]
    Bind { port: u16, reason: String },

    /// The provider redirected back with an `error` parameter.
    #[error("authorization was refused ({code}): {description}")]
    Provider { code: String, description: String },

    /// The callback was missing required data.
    #[error("malformed authorization callback: {0}")]
    Malformed(String),

    /// No callback arrived before the deadline.
    #[error("timed out after {0}s waiting for browser authorization")]
    TimedOut(u64),

    /// The attempt was cancelled by logout or a newer attempt.
    #[error("authorization cancelled: {0}")]
    Cancelled(String),

    /// Transport failure talking to the remote API (transient).
    #[error("network error: {0}")]
    Network(String),

    /// The remote API rejected the token or session key.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The remote API answered with something we could not parse.
    #[error("unexpected API response: {0}")]
    InvalidResponse(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid state transition in the flow FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable error kind carried in payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    BindError,
    ProviderError,
    Malformed,
    TimedOut,
    Cancelled,
    NetworkError,
    InvalidCredential,
    InvalidResponse,
    StorageError,
    InvalidStateTransition,
    Config,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BindError => "bind_error",
            Self::ProviderError => "provider_error",
            Self::Malformed => "malformed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::NetworkError => "network_error",
            Self::InvalidCredential => "invalid_credential",
            Self::InvalidResponse => "invalid_response",
            Self::StorageError => "storage_error",
            Self::InvalidStateTransition => "invalid_state_transition",
            Self::Config => "config",
        }
    }
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Bind { .. } => AuthErrorKind::BindError,
            AuthError::Provider { .. } => AuthErrorKind::ProviderError,
            AuthError::Malformed(_) => AuthErrorKind::Malformed,
            AuthError::TimedOut(_) => AuthErrorKind::TimedOut,
            AuthError::Cancelled(_) => AuthErrorKind::Cancelled,
            AuthError::Network(_) => AuthErrorKind::NetworkError,
            AuthError::InvalidCredential(_) => AuthErrorKind::InvalidCredential,
            AuthError::InvalidResponse(_) => AuthErrorKind::InvalidResponse,
            AuthError::Storage(_) => AuthErrorKind::StorageError,
            AuthError::InvalidStateTransition(_) => AuthErrorKind::InvalidStateTransition,
            AuthError::Config(_) => AuthErrorKind::Config,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_) | AuthError::TimedOut(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs carry the token and signature in their query string.
        AuthError::Network(e.without_url().to_string())
    }
}

impl From<CoreError> for AuthError {
    fn from(e: CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        AuthError::Config(format!("invalid URL: {e}"))
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient() {
        assert!(AuthError::Network("connection reset".into()).is_transient());
        assert!(AuthError::TimedOut(300).is_transient());
    }

    #[test]
    fn test_is_not_transient() {
        assert!(!AuthError::InvalidCredential("bad key".into()).is_transient());
        assert!(!AuthError::Cancelled("logout".into()).is_transient());
        assert!(!AuthError::Malformed("missing token".into()).is_transient());
        assert!(!AuthError::Bind {
            port: 5555,
            reason: "in use".into()
        }
        .is_transient());
    }

    #[test]
    fn test_kind_names() {
        let cases = [
            (
                AuthError::Provider {
                    code: "access_denied".into(),
                    description: String::new(),
                },
                "provider_error",
            ),
            (AuthError::TimedOut(1), "timed_out"),
            (AuthError::Network("x".into()), "network_error"),
            (
                AuthError::Storage(StorageError::CorruptRecord("x".into())),
                "storage_error",
            ),
        ];
        for (err, name) in cases {
            assert_eq!(err.kind().as_str(), name);
            assert_eq!(
                serde_json::to_string(&err.kind()).unwrap(),
                format!("\"{name}\"")
            );
        }
    }

    #[test]
    fn test_core_error_becomes_config() {
        let err: AuthError = CoreError::Config("API key is not set".into()).into();
        assert_eq!(err.kind(), AuthErrorKind::Config);
    }
}
