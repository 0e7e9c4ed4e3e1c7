//! Session lifecycle: acquire, adopt, restore, invalidate, log out.
//!
//! `SessionLifecycle` is the only entry point hosts use. It owns the session
//! store and at most one in-flight authorization attempt; starting a new
//! attempt cancels the previous one and waits for it to release its port.

use crate::browser::{BrowserLauncher, PrintOnly, SystemBrowser};
use crate::orchestrator::{
    persist_off_thread, AttemptProgress, AuthOrchestrator, AuthOutcome, AuthSettings,
    PendingAuthAttempt,
};
use crate::{
    AuthError, AuthResult, AuthStatus, FlowState, MusicApiClient, Session, SessionApi,
    SessionStore,
};
use encore_config_and_utils::{Config, Paths};
use encore_storage::{create_session_vault, StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call overrides for an interactive login.
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
    pub open_browser: Option<bool>,
    pub strict_state: Option<bool>,
}

impl AuthOptions {
    fn apply(&self, base: &AuthSettings) -> AuthSettings {
        let mut settings = base.clone();
        if let Some(port) = self.port {
            settings.callback_port = port;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout = timeout;
        }
        if let Some(open_browser) = self.open_browser {
            settings.open_browser = open_browser;
        }
        if let Some(strict_state) = self.strict_state {
            settings.strict_state = strict_state;
        }
        settings
    }
}

struct ActiveAttempt {
    id: Uuid,
    cancel: CancellationToken,
    progress: watch::Receiver<AttemptProgress>,
}

impl ActiveAttempt {
    /// Terminal, or the orchestrator is gone without saying so.
    fn is_finished(&self) -> bool {
        self.progress.has_changed().is_err() || self.progress.borrow().state.is_terminal()
    }
}

/// Clears the attempt slot when the attempt that owns it ends.
///
/// An attempt dropped mid-flight is not terminal yet: its entry stays so the
/// next attempt waits for the port to be released.
struct SlotGuard {
    slot: Arc<Mutex<Option<ActiveAttempt>>>,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot
            .as_ref()
            .is_some_and(|active| active.id == self.id && active.is_finished())
        {
            *slot = None;
        }
    }
}

async fn wait_until_terminal(mut progress: watch::Receiver<AttemptProgress>) {
    // A closed channel means the orchestrator is gone, which is terminal too.
    let _ = progress.wait_for(|p| p.state.is_terminal()).await;
}

/// Façade over the session store and the interactive flow.
#[derive(Clone)]
pub struct SessionLifecycle {
    settings: AuthSettings,
    store: Arc<SessionStore>,
    api: Arc<dyn SessionApi>,
    launcher: Arc<dyn BrowserLauncher>,
    attempt: Arc<Mutex<Option<ActiveAttempt>>>,
}

impl SessionLifecycle {
    /// Lifecycle that opens the system browser.
    pub fn new(settings: AuthSettings, store: Arc<SessionStore>, api: Arc<dyn SessionApi>) -> Self {
        Self::with_launcher(settings, store, api, Arc::new(SystemBrowser))
    }

    pub fn with_launcher(
        settings: AuthSettings,
        store: Arc<SessionStore>,
        api: Arc<dyn SessionApi>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            settings,
            store,
            api,
            launcher,
            attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Wire up storage and the web service client from configuration.
    ///
    /// Credentials are not checked here so status and logout work without
    /// them; call [`Config::validate_for_auth`] before authenticating.
    pub fn from_config(config: &Config, paths: &Paths) -> AuthResult<Self> {
        let vault = create_session_vault(config.storage_backend, &paths.credentials_dir())?;
        let api = MusicApiClient::new(
            config.api_root()?,
            config.api_key.as_str(),
            config.shared_secret.as_str(),
        )?;
        Ok(Self::new(
            AuthSettings::from_config(config)?,
            Arc::new(SessionStore::new(vault)),
            Arc::new(api),
        ))
    }

    /// Run the browser flow. Cancels any attempt already in flight first.
    pub async fn authenticate_interactive(&self, options: AuthOptions) -> AuthResult<AuthOutcome> {
        let settings = options.apply(&self.settings);
        let launcher: Arc<dyn BrowserLauncher> = if settings.open_browser {
            self.launcher.clone()
        } else {
            Arc::new(PrintOnly)
        };

        let cancel = CancellationToken::new();
        let orchestrator = AuthOrchestrator::new(
            settings,
            self.api.clone(),
            launcher,
            self.store.clone(),
            cancel.clone(),
        );
        let id = Uuid::new_v4();
        let previous = self.attempt.lock().replace(ActiveAttempt {
            id,
            cancel,
            progress: orchestrator.subscribe(),
        });
        let _slot = SlotGuard {
            slot: self.attempt.clone(),
            id,
        };

        if let Some(previous) = previous {
            info!(attempt = %previous.id, "cancelling in-flight authorization");
            previous.cancel.cancel();
            wait_until_terminal(previous.progress).await;
        }

        debug!(attempt = %id, "starting authorization attempt");
        orchestrator.run().await
    }

    /// Use a session key obtained elsewhere, after one read-only check.
    ///
    /// Transport failures stay `Network`; every other failure is reported as
    /// `InvalidCredential`. The store is untouched on failure.
    pub async fn adopt_session_key(&self, session_key: &str) -> AuthResult<AuthOutcome> {
        let session_key = session_key.trim();
        if session_key.is_empty() {
            return Err(AuthError::InvalidCredential(
                "session key is empty".to_string(),
            ));
        }

        let display_name = match self.api.validate_session_key(session_key).await {
            Ok(name) => name,
            Err(e @ AuthError::Network(_)) | Err(e @ AuthError::InvalidCredential(_)) => {
                warn!(kind = e.kind().as_str(), "session key was not accepted");
                return Err(e);
            }
            Err(e) => {
                warn!(kind = e.kind().as_str(), "session key was not accepted");
                return Err(AuthError::InvalidCredential(e.to_string()));
            }
        };

        let session = Session::new(session_key, display_name);
        self.store.set(session.clone());
        let persistence_warning = persist_off_thread(self.store.clone(), session.clone())
            .await
            .err();
        if let Some(e) = &persistence_warning {
            warn!(kind = ?e.kind(), error = %e, "adopted session was not persisted");
        }
        info!(display_name = %session.display_name(), "session key adopted");

        Ok(AuthOutcome {
            session,
            persistence_warning,
        })
    }

    /// In-memory status only; no I/O.
    pub fn status(&self) -> AuthStatus {
        AuthStatus::from_session(self.store.get().as_ref())
    }

    /// Copy of the live session, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.store.get()
    }

    /// Load the persisted record into memory without contacting the service.
    pub async fn restore_from_storage(&self) -> StorageResult<Option<Session>> {
        let store = self.store.clone();
        let restored = tokio::task::spawn_blocking(move || store.load_persisted())
            .await
            .unwrap_or_else(|e| {
                Err(StorageError::BackendUnavailable(format!(
                    "restore task failed: {e}"
                )))
            })?;

        match &restored {
            Some(session) => {
                self.store.set(session.clone());
                info!(
                    display_name = %session.display_name(),
                    backend = self.store.backend_name(),
                    "session restored from storage"
                );
            }
            None => debug!(backend = self.store.backend_name(), "no persisted session"),
        }
        Ok(restored)
    }

    /// Cancel any attempt, forget the session and delete its record.
    ///
    /// Memory is cleared even when deleting the record fails.
    pub async fn logout(&self) -> StorageResult<()> {
        self.cancel_attempt().await;
        let had_session = self.store.clear().is_some();
        self.delete_persisted().await?;
        info!(had_session, "logged out");
        Ok(())
    }

    /// Drop a session the web service has stopped accepting.
    pub async fn invalidate_session(&self, reason: &str) -> StorageResult<()> {
        if self.store.clear().is_none() {
            debug!(reason, "invalidation requested without a live session");
        } else {
            warn!(reason, "session invalidated");
        }
        self.delete_persisted().await
    }

    /// Cancel the in-flight attempt and wait until it has released its port.
    /// Returns whether one was still running.
    pub async fn cancel_attempt(&self) -> bool {
        let active = self.attempt.lock().take();
        match active {
            Some(active) if !active.is_finished() => {
                info!(attempt = %active.id, "cancelling authorization attempt");
                active.cancel.cancel();
                wait_until_terminal(active.progress).await;
                true
            }
            _ => false,
        }
    }

    /// State of the in-flight attempt, `Idle` when none is running.
    pub fn flow_state(&self) -> FlowState {
        self.attempt
            .lock()
            .as_ref()
            .map(|active| active.progress.borrow().state)
            .filter(|state| !state.is_terminal())
            .unwrap_or(FlowState::Idle)
    }

    /// Copy of the attempt currently waiting on the user, if any.
    pub fn pending_attempt(&self) -> Option<PendingAuthAttempt> {
        self.attempt
            .lock()
            .as_ref()
            .and_then(|active| active.progress.borrow().pending.clone())
    }

    /// Name of the durable backend in use.
    pub fn storage_backend(&self) -> &'static str {
        self.store.backend_name()
    }

    async fn delete_persisted(&self) -> StorageResult<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.delete_persisted())
            .await
            .unwrap_or_else(|e| {
                Err(StorageError::BackendUnavailable(format!(
                    "delete task failed: {e}"
                )))
            })
    }
}
