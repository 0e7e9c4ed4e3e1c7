//! Interactive browser login.

use auth_engine::{AuthOptions, LifecyclePayload, SessionLifecycle};
use std::time::Duration;
use tracing::info;

/// Turn CLI flags into per-call overrides; unset flags keep the config.
pub fn login_options(
    no_browser: bool,
    port: Option<u16>,
    timeout_secs: Option<u64>,
    strict_state: bool,
) -> AuthOptions {
    AuthOptions {
        port,
        timeout: timeout_secs.map(Duration::from_secs),
        open_browser: no_browser.then_some(false),
        strict_state: strict_state.then_some(true),
    }
}

/// Run the browser flow. Ctrl-C cancels the attempt and releases the port.
pub async fn login(lifecycle: &SessionLifecycle, options: AuthOptions) -> LifecyclePayload {
    let attempt = lifecycle.authenticate_interactive(options);
    tokio::pin!(attempt);

    let result = tokio::select! {
        result = &mut attempt => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling authorization");
            let (_, result) = tokio::join!(lifecycle.cancel_attempt(), &mut attempt);
            result
        }
    };

    match result {
        Ok(outcome) => LifecyclePayload::from_outcome(&outcome),
        Err(e) => LifecyclePayload::from_auth_error(&e),
    }
}
