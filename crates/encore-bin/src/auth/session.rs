//! Non-interactive session commands.

use auth_engine::{LifecyclePayload, SessionLifecycle};
use tracing::warn;

/// Seed memory from storage before another command runs. A storage problem
/// only means the command starts unauthenticated.
pub async fn restore_quietly(lifecycle: &SessionLifecycle) {
    if let Err(e) = lifecycle.restore_from_storage().await {
        warn!(kind = ?e.kind(), error = %e, "could not restore stored session");
    }
}

pub async fn restore(lifecycle: &SessionLifecycle) -> LifecyclePayload {
    match lifecycle.restore_from_storage().await {
        Ok(_) => LifecyclePayload::from_status(&lifecycle.status()),
        Err(e) => LifecyclePayload::from_storage_error(&e),
    }
}

pub async fn adopt(lifecycle: &SessionLifecycle, key: &str) -> LifecyclePayload {
    match lifecycle.adopt_session_key(key).await {
        Ok(outcome) => LifecyclePayload::from_outcome(&outcome),
        Err(e) => LifecyclePayload::from_auth_error(&e),
    }
}

pub fn status(lifecycle: &SessionLifecycle) -> LifecyclePayload {
    LifecyclePayload::from_status(&lifecycle.status())
}

pub async fn logout(lifecycle: &SessionLifecycle) -> LifecyclePayload {
    match lifecycle.logout().await {
        Ok(()) => LifecyclePayload::logged_out(),
        Err(e) => LifecyclePayload::from_storage_error(&e),
    }
}
