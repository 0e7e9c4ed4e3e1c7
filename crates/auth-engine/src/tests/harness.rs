//! Test harness for lifecycle scenario tests.
//!
//! Provides:
//! - FakeApi: scripted `SessionApi` that counts calls
//! - ScriptedBrowser: a launcher that plays the user's browser over loopback
//! - FailingStorage: a backend whose writes always fail
//! - TestHarness: a `SessionLifecycle` wired to the fakes

use crate::{
    AuthOptions, AuthResult, AuthSettings, BrowserLauncher, FlowState, Session, SessionApi,
    SessionLifecycle, SessionStore,
};
use async_trait::async_trait;
use encore_storage::{
    MemoryStorage, SecureStorage, SessionVault, StorageError, StorageResult,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default deadline for scenario attempts that are expected to finish.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// FakeApi
// =============================================================================

/// `SessionApi` with configurable answers.
pub struct FakeApi {
    exchange: Mutex<AuthResult<Session>>,
    validate: Mutex<AuthResult<String>>,
    exchange_calls: AtomicUsize,
    validate_calls: AtomicUsize,
    last_token: Mutex<Option<String>>,
}

impl FakeApi {
    /// Exchanges any token for `sk_1`/`alice`; validates any key as `alice`.
    pub fn new() -> Self {
        Self {
            exchange: Mutex::new(Ok(Session::new("sk_1", "alice"))),
            validate: Mutex::new(Ok("alice".to_string())),
            exchange_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            last_token: Mutex::new(None),
        }
    }

    pub fn set_exchange(&self, result: AuthResult<Session>) {
        *self.exchange.lock() = result;
    }

    pub fn set_validate(&self, result: AuthResult<String>) {
        *self.validate.lock() = result;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().clone()
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn exchange_token(&self, token: &str) -> AuthResult<Session> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock() = Some(token.to_string());
        self.exchange.lock().clone()
    }

    async fn validate_session_key(&self, _session_key: &str) -> AuthResult<String> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.validate.lock().clone()
    }
}

// =============================================================================
// ScriptedBrowser
// =============================================================================

/// What the "user" does with the next authorization URL.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum BrowserAction {
    /// Approve: redirect with `token` and the `state` from the URL.
    Approve { token: String },
    /// Approve, then hit the callback a second time.
    ApproveTwice { token: String },
    /// Redirect with exactly this query string.
    Redirect { query: String },
    /// Never come back.
    Ignore,
    /// The launcher itself fails.
    FailToLaunch,
}

impl BrowserAction {
    pub fn approve(token: &str) -> Self {
        Self::Approve {
            token: token.to_string(),
        }
    }

    pub fn redirect(query: &str) -> Self {
        Self::Redirect {
            query: query.to_string(),
        }
    }
}

/// Launcher that performs queued actions against the callback URL.
/// Unscripted opens fall back to `Ignore`.
pub struct ScriptedBrowser {
    actions: Mutex<VecDeque<BrowserAction>>,
    opened: Mutex<Vec<Url>>,
    responses: Arc<Mutex<Vec<u16>>>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            opened: Mutex::new(Vec::new()),
            responses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, action: BrowserAction) {
        self.actions.lock().push_back(action);
    }

    /// Every authorization URL handed to the launcher.
    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().clone()
    }

    /// HTTP statuses the callback listener answered with.
    pub fn responses(&self) -> Vec<u16> {
        self.responses.lock().clone()
    }
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        let url = Url::parse(url).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.opened.lock().push(url.clone());

        let action = self
            .actions
            .lock()
            .pop_front()
            .unwrap_or(BrowserAction::Ignore);

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let callback = params
            .get("cb")
            .cloned()
            .unwrap_or_default()
            .replace("localhost", "127.0.0.1");
        let state = params.get("state").cloned().unwrap_or_default();

        let targets = match action {
            BrowserAction::Approve { token } => {
                vec![format!("{callback}?token={token}&state={state}")]
            }
            BrowserAction::ApproveTwice { token } => vec![
                format!("{callback}?token={token}&state={state}"),
                format!("{callback}?token={token}&state={state}"),
            ],
            BrowserAction::Redirect { query } => vec![format!("{callback}?{query}")],
            BrowserAction::Ignore => Vec::new(),
            BrowserAction::FailToLaunch => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no browser available"))
            }
        };

        if !targets.is_empty() {
            let responses = self.responses.clone();
            tokio::spawn(async move {
                let client = reqwest::Client::new();
                for target in targets {
                    if let Ok(response) = client.get(&target).send().await {
                        responses.lock().push(response.status().as_u16());
                    }
                }
            });
        }
        Ok(())
    }
}

// =============================================================================
// FailingStorage
// =============================================================================

/// Backend that reads as empty and refuses every write.
pub struct FailingStorage;

impl SecureStorage for FailingStorage {
    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::BackendUnavailable("keychain locked".to_string()))
    }

    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn delete(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

// =============================================================================
// TestHarness
// =============================================================================

pub fn test_settings() -> AuthSettings {
    AuthSettings {
        api_key: "xxxx".to_string(),
        auth_url: Url::parse("https://auth.example.test/api/auth/").unwrap(),
        callback_port: 0,
        timeout: TEST_TIMEOUT,
        open_browser: true,
        strict_state: false,
    }
}

/// A lifecycle wired to fakes, plus handles to inspect them.
pub struct TestHarness {
    pub lifecycle: SessionLifecycle,
    pub api: Arc<FakeApi>,
    pub browser: Arc<ScriptedBrowser>,
    pub store: Arc<SessionStore>,
}

impl TestHarness {
    /// In-memory storage.
    pub fn new() -> Self {
        Self::with_storage(Box::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Box<dyn SecureStorage>) -> Self {
        let api = Arc::new(FakeApi::new());
        let browser = Arc::new(ScriptedBrowser::new());
        let store = Arc::new(SessionStore::new(SessionVault::new(storage)));
        let lifecycle = SessionLifecycle::with_launcher(
            test_settings(),
            store.clone(),
            api.clone(),
            browser.clone(),
        );
        Self {
            lifecycle,
            api,
            browser,
            store,
        }
    }

    /// Options pinning the callback port.
    pub fn on_port(port: u16) -> AuthOptions {
        AuthOptions {
            port: Some(port),
            ..AuthOptions::default()
        }
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Poll until the lifecycle's in-flight attempt reaches `state`.
pub async fn wait_for_flow_state(lifecycle: &SessionLifecycle, state: FlowState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while lifecycle.flow_state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "attempt never reached {state:?}, still {:?}",
            lifecycle.flow_state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
