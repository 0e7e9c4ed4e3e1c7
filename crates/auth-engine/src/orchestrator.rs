//! One interactive authorization attempt, from bind to stored session.
//!
//! An orchestrator is built per attempt and consumed by [`AuthOrchestrator::run`].
//! It owns the callback listener, so the listening port lives exactly as long
//! as the attempt does.

use crate::browser::{BrowserLauncher, PrintOnly};
use crate::callback::{CallbackListener, CallbackResult};
use crate::flow_fsm::{transition, FlowMachine, FlowMachineInput, FlowState};
use crate::{AuthError, AuthResult, Session, SessionApi, SessionStore};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use encore_config_and_utils::Config;
use encore_storage::StorageError;
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Resolved settings for one attempt.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub api_key: String,
    pub auth_url: Url,
    pub callback_port: u16,
    pub timeout: Duration,
    pub open_browser: bool,
    pub strict_state: bool,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            auth_url: config.auth_url()?,
            callback_port: config.callback_port,
            timeout: Duration::from_secs(config.auth_timeout_secs),
            open_browser: config.open_browser,
            strict_state: config.strict_state,
        })
    }
}

/// Bookkeeping for the attempt currently waiting on the browser.
#[derive(Clone, Serialize)]
pub struct PendingAuthAttempt {
    #[serde(skip)]
    csrf_state: String,
    pub listener_port: u16,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl PendingAuthAttempt {
    /// The CSRF value sent with the authorization URL.
    pub fn csrf_state(&self) -> &str {
        &self.csrf_state
    }
}

impl fmt::Debug for PendingAuthAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthAttempt")
            .field("csrf_state", &crate::session::REDACTED)
            .field("listener_port", &self.listener_port)
            .field("started_at", &self.started_at)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// What observers of an attempt can see.
#[derive(Debug, Clone)]
pub struct AttemptProgress {
    pub state: FlowState,
    /// Present only while the attempt is awaiting the user or exchanging.
    pub pending: Option<PendingAuthAttempt>,
}

/// A successful login. The session is live even if persisting it failed.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub session: Session,
    pub persistence_warning: Option<StorageError>,
}

/// Random CSRF value: 16 bytes, URL-safe base64 without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `<auth_url>?api_key=..&cb=<encoded callback>&state=..`
pub fn authorization_url(auth_url: &Url, api_key: &str, callback_url: &str, csrf_state: &str) -> Url {
    let mut url = auth_url.clone();
    url.query_pairs_mut()
        .append_pair("api_key", api_key)
        .append_pair("cb", callback_url)
        .append_pair("state", csrf_state);
    url
}

/// The authorization URL with its CSRF `state` masked, for logs.
pub(crate) fn loggable_authorization_url(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "state" {
                crate::session::REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked
}

/// Failure carrying the FSM input that records it.
type Step<T> = Result<T, (FlowMachineInput, AuthError)>;

/// Drives one attempt through the flow state machine.
pub struct AuthOrchestrator {
    settings: AuthSettings,
    api: Arc<dyn SessionApi>,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<SessionStore>,
    cancel: CancellationToken,
    machine: FlowMachine,
    listener: CallbackListener,
    csrf_state: String,
    progress: watch::Sender<AttemptProgress>,
}

impl AuthOrchestrator {
    pub fn new(
        settings: AuthSettings,
        api: Arc<dyn SessionApi>,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<SessionStore>,
        cancel: CancellationToken,
    ) -> Self {
        let listener = CallbackListener::with_strict_state(settings.strict_state);
        let (progress, _) = watch::channel(AttemptProgress {
            state: FlowState::Idle,
            pending: None,
        });
        Self {
            settings,
            api,
            launcher,
            store,
            cancel,
            machine: FlowMachine::new(),
            listener,
            csrf_state: generate_state(),
            progress,
        }
    }

    /// Watch the attempt's state. The last value sent is always terminal.
    pub fn subscribe(&self) -> watch::Receiver<AttemptProgress> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> FlowState {
        FlowState::from(self.machine.state())
    }

    /// Run the attempt to a terminal state.
    ///
    /// The listener is stopped before the terminal state is published, so an
    /// observer that sees a terminal state can rebind the port.
    pub async fn run(mut self) -> AuthResult<AuthOutcome> {
        let driven = self.drive().await;
        self.listener.stop().await;

        match driven {
            Ok(outcome) => {
                self.advance(FlowMachineInput::ExchangeSucceeded)?;
                info!(
                    display_name = %outcome.session.display_name(),
                    persisted = outcome.persistence_warning.is_none(),
                    "authorization completed"
                );
                Ok(outcome)
            }
            Err((input, error)) => {
                if let Err(e) = self.advance(input) {
                    warn!(error = %e, "could not record failed authorization");
                }
                warn!(kind = error.kind().as_str(), error = %error, state = ?self.state(), "authorization ended");
                Err(error)
            }
        }
    }

    async fn drive(&mut self) -> Step<AuthOutcome> {
        self.advance(FlowMachineInput::Start)
            .map_err(|e| (FlowMachineInput::Cancel, e))?;
        self.ensure_not_cancelled()?;

        if let Err(e) = self.listener.start(self.settings.callback_port).await {
            return Err((FlowMachineInput::BindFailed, e));
        }
        let (port, callback_url) = match (self.listener.port(), self.listener.callback_url()) {
            (Some(port), Some(url)) => (port, url),
            _ => {
                return Err((
                    FlowMachineInput::BindFailed,
                    AuthError::Bind {
                        port: self.settings.callback_port,
                        reason: "listener has no local address".to_string(),
                    },
                ))
            }
        };

        self.listener.arm_expectation(self.csrf_state.clone());
        let url = authorization_url(
            &self.settings.auth_url,
            &self.settings.api_key,
            &callback_url,
            &self.csrf_state,
        );

        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(self.settings.timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let pending = PendingAuthAttempt {
            csrf_state: self.csrf_state.clone(),
            listener_port: port,
            started_at,
            deadline,
        };
        self.advance_with(FlowMachineInput::ListenerReady, Some(pending))
            .map_err(|e| (FlowMachineInput::Cancel, e))?;
        info!(port, timeout_secs = self.settings.timeout.as_secs(), "waiting for browser authorization");

        if let Err(e) = self.launcher.open(url.as_str()) {
            info!(
                error = %e,
                url = %loggable_authorization_url(&url),
                "could not open a browser, printing the authorization URL"
            );
            let _ = PrintOnly.open(url.as_str());
        }

        let callback = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err((
                    FlowMachineInput::Cancel,
                    AuthError::Cancelled("authorization attempt was superseded".to_string()),
                ));
            }
            _ = tokio::time::sleep(self.settings.timeout) => {
                return Err((
                    FlowMachineInput::DeadlineElapsed,
                    AuthError::TimedOut(self.settings.timeout.as_secs()),
                ));
            }
            result = self.listener.await_result() => {
                result.map_err(|e| match e {
                    AuthError::Bind { .. } => (FlowMachineInput::CallbackRejected, e),
                    e => (FlowMachineInput::Cancel, e),
                })?
            }
        };

        let token = match callback {
            CallbackResult::Success { token } => token,
            CallbackResult::ProviderError { code, description } => {
                return Err((
                    FlowMachineInput::CallbackRejected,
                    AuthError::Provider { code, description },
                ));
            }
            CallbackResult::Malformed { reason } => {
                return Err((FlowMachineInput::CallbackRejected, AuthError::Malformed(reason)));
            }
        };

        self.advance(FlowMachineInput::CallbackReceived)
            .map_err(|e| (FlowMachineInput::Cancel, e))?;

        let api = self.api.clone();
        let session = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err((
                    FlowMachineInput::Cancel,
                    AuthError::Cancelled("authorization attempt was superseded".to_string()),
                ));
            }
            exchanged = api.exchange_token(&token) => {
                exchanged.map_err(|e| (FlowMachineInput::ExchangeFailed, e))?
            }
        };

        self.store.set(session.clone());
        let persistence_warning = persist_off_thread(self.store.clone(), session.clone())
            .await
            .err();
        if let Some(e) = &persistence_warning {
            warn!(kind = ?e.kind(), error = %e, "session is live but was not persisted");
        }

        Ok(AuthOutcome {
            session,
            persistence_warning,
        })
    }

    fn ensure_not_cancelled(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            return Err((
                FlowMachineInput::Cancel,
                AuthError::Cancelled("authorization attempt was superseded".to_string()),
            ));
        }
        Ok(())
    }

    fn advance(&mut self, input: FlowMachineInput) -> AuthResult<FlowState> {
        let pending = self.progress.borrow().pending.clone();
        self.advance_with(input, pending)
    }

    fn advance_with(
        &mut self,
        input: FlowMachineInput,
        pending: Option<PendingAuthAttempt>,
    ) -> AuthResult<FlowState> {
        let state = transition(&mut self.machine, input)?;
        let pending = if state.is_terminal() { None } else { pending };
        self.progress.send_replace(AttemptProgress { state, pending });
        Ok(state)
    }
}

impl Drop for AuthOrchestrator {
    fn drop(&mut self) {
        if self.state().is_terminal() {
            return;
        }

        // An abandoned run still has to look finished to anyone waiting on
        // it, but only once its port is free again.
        let (detached, _) = watch::channel(AttemptProgress {
            state: FlowState::Cancelled,
            pending: None,
        });
        let progress = std::mem::replace(&mut self.progress, detached);
        let publish = move || {
            progress.send_replace(AttemptProgress {
                state: FlowState::Cancelled,
                pending: None,
            });
        };

        match (
            self.listener.shutdown_now(),
            tokio::runtime::Handle::try_current(),
        ) {
            (Some(accept_task), Ok(runtime)) => {
                runtime.spawn(async move {
                    let _ = accept_task.await;
                    publish();
                });
            }
            _ => publish(),
        }
        debug!("abandoned authorization attempt torn down");
    }
}

/// Durable writes block; keep them off the async workers.
pub(crate) async fn persist_off_thread(
    store: Arc<SessionStore>,
    session: Session,
) -> Result<(), StorageError> {
    tokio::task::spawn_blocking(move || store.persist(&session))
        .await
        .unwrap_or_else(|e| {
            Err(StorageError::BackendUnavailable(format!(
                "persist task failed: {e}"
            )))
        })
}
