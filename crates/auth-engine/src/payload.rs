//! Structured results returned to hosts for every lifecycle operation.
//!
//! ```json
//! {"ok":true,"authenticated":true,"display_name":"alice"}
//! {"ok":true,"authenticated":true,"display_name":"alice","warning":{"kind":"backend_unavailable","message":"..."}}
//! {"ok":false,"kind":"timed_out","message":"..."}
//! {"ok":false,"kind":"storage_error","storage_kind":"corrupt_record","message":"..."}
//! ```

use crate::{AuthError, AuthErrorKind, AuthOutcome, AuthStatus};
use encore_storage::{StorageError, StorageErrorKind};
use serde::Serialize;

/// A persistence problem that did not stop the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningPayload {
    pub kind: StorageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessPayload {
    ok: bool,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<WarningPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailurePayload {
    ok: bool,
    pub kind: AuthErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_kind: Option<StorageErrorKind>,
    pub message: String,
}

/// Success or failure of one lifecycle call. Never carries a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LifecyclePayload {
    Success(SuccessPayload),
    Failure(FailurePayload),
}

impl LifecyclePayload {
    pub fn from_status(status: &AuthStatus) -> Self {
        Self::Success(SuccessPayload {
            ok: true,
            authenticated: status.authenticated,
            display_name: status.display_name.clone(),
            warning: None,
        })
    }

    pub fn from_outcome(outcome: &AuthOutcome) -> Self {
        Self::Success(SuccessPayload {
            ok: true,
            authenticated: true,
            display_name: Some(outcome.session.display_name().to_string()),
            warning: outcome
                .persistence_warning
                .as_ref()
                .map(|e| WarningPayload {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
        })
    }

    pub fn logged_out() -> Self {
        Self::from_status(&AuthStatus::from_session(None))
    }

    pub fn from_auth_error(error: &AuthError) -> Self {
        let storage_kind = match error {
            AuthError::Storage(e) => Some(e.kind()),
            _ => None,
        };
        Self::Failure(FailurePayload {
            ok: false,
            kind: error.kind(),
            storage_kind,
            message: error.to_string(),
        })
    }

    pub fn from_storage_error(error: &StorageError) -> Self {
        Self::Failure(FailurePayload {
            ok: false,
            kind: AuthErrorKind::StorageError,
            storage_kind: Some(error.kind()),
            message: error.to_string(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Session;
    use serde_json::json;

    #[test]
    fn test_status_payload() {
        let status = AuthStatus::from_session(Some(&Session::new("sk_1", "alice")));
        assert_eq!(
            serde_json::to_value(LifecyclePayload::from_status(&status)).unwrap(),
            json!({ "ok": true, "authenticated": true, "display_name": "alice" })
        );
        assert_eq!(
            serde_json::to_value(LifecyclePayload::logged_out()).unwrap(),
            json!({ "ok": true, "authenticated": false })
        );
    }

    #[test]
    fn test_outcome_with_warning() {
        let outcome = AuthOutcome {
            session: Session::new("sk_1", "alice"),
            persistence_warning: Some(StorageError::BackendUnavailable("keychain locked".into())),
        };
        let value = serde_json::to_value(LifecyclePayload::from_outcome(&outcome)).unwrap();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["warning"]["kind"], json!("backend_unavailable"));
        assert!(!value.to_string().contains("sk_1"));
    }

    #[test]
    fn test_error_payloads() {
        let value =
            serde_json::to_value(LifecyclePayload::from_auth_error(&AuthError::TimedOut(300)))
                .unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["kind"], json!("timed_out"));
        assert!(value.get("storage_kind").is_none());

        let storage = StorageError::CorruptRecord("session_key failed to decrypt".into());
        let payload = LifecyclePayload::from_storage_error(&storage);
        assert!(!payload.is_ok());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], json!("storage_error"));
        assert_eq!(value["storage_kind"], json!("corrupt_record"));

        match LifecyclePayload::from_auth_error(&AuthError::Storage(storage)) {
            LifecyclePayload::Failure(failure) => {
                assert_eq!(failure.kind, AuthErrorKind::StorageError);
                assert_eq!(failure.storage_kind, Some(StorageErrorKind::CorruptRecord));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
