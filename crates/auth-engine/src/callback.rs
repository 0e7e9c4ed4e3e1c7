//! Ephemeral local HTTP server that receives the browser redirect.
//!
//! Routes:
//! - `GET /callback?token=..&state=..` or `?error=..&error_description=..`
//!   resolves the attempt (once) and always answers with an HTML page.
//! - `GET /health` answers `{"status":"ok"}` and never resolves anything.
//! - anything else is 404 (or 405 for non-GET) and never resolves anything.

use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Path the provider redirects the browser to.
pub const CALLBACK_PATH: &str = "/callback";

/// Readiness probe path.
pub const HEALTH_PATH: &str = "/health";

/// Upper bound on how long one connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEADER_LINES: usize = 100;
/// Pause before accepting again when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What the browser redirect carried.
#[derive(Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Success { token: String },
    ProviderError { code: String, description: String },
    Malformed { reason: String },
}

impl fmt::Debug for CallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { .. } => f
                .debug_struct("Success")
                .field("token", &crate::session::REDACTED)
                .finish(),
            Self::ProviderError { code, description } => f
                .debug_struct("ProviderError")
                .field("code", code)
                .field("description", description)
                .finish(),
            Self::Malformed { reason } => {
                f.debug_struct("Malformed").field("reason", reason).finish()
            }
        }
    }
}

#[derive(Clone)]
struct Expectation {
    state: String,
    strict: bool,
}

/// State shared between the listener handle and its connection tasks.
struct Shared {
    /// `Some` until the first callback resolves the attempt.
    result_tx: Mutex<Option<oneshot::Sender<CallbackResult>>>,
    expectation: Mutex<Option<Expectation>>,
    strict_state: bool,
    /// Why the accept loop gave up, if it did.
    failure: Mutex<Option<String>>,
}

impl Shared {
    /// Deliver the result if nobody has yet. Returns whether this call won.
    fn resolve(&self, result: CallbackResult) -> bool {
        match self.result_tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// The listener can no longer serve callbacks; wake the waiter now.
    fn fail(&self, reason: String) {
        *self.failure.lock() = Some(reason);
        self.result_tx.lock().take();
    }
}

/// Local HTTP listener for one authorization attempt.
pub struct CallbackListener {
    shared: Arc<Shared>,
    result_rx: Option<oneshot::Receiver<CallbackResult>>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// A listener with advisory `state` checking.
    pub fn new() -> Self {
        Self::with_strict_state(false)
    }

    /// When `strict` is set a missing or mismatched `state` resolves as
    /// `Malformed` instead of only being logged.
    pub fn with_strict_state(strict: bool) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            shared: Arc::new(Shared {
                result_tx: Mutex::new(Some(tx)),
                expectation: Mutex::new(None),
                strict_state: strict,
                failure: Mutex::new(None),
            }),
            result_rx: Some(rx),
            local_addr: None,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Bind `127.0.0.1:<port>` and start accepting. Port 0 picks a free port.
    pub async fn start(&mut self, port: u16) -> AuthResult<()> {
        if self.task.is_some() || self.shutdown.is_cancelled() {
            return Err(AuthError::Bind {
                port,
                reason: "listener already used".to_string(),
            });
        }

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::Bind {
                port,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| AuthError::Bind {
            port,
            reason: e.to_string(),
        })?;

        info!(port = local_addr.port(), "callback listener bound");

        self.local_addr = Some(local_addr);
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.shared.clone(),
            self.shutdown.clone(),
        )));
        Ok(())
    }

    /// The bound port, once started.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// URL the provider should redirect to.
    pub fn callback_url(&self) -> Option<String> {
        self.port()
            .map(|port| format!("http://localhost:{port}{CALLBACK_PATH}"))
    }

    /// Record the CSRF value incoming callbacks are compared against.
    pub fn arm_expectation(&self, csrf_state: impl Into<String>) {
        *self.shared.expectation.lock() = Some(Expectation {
            state: csrf_state.into(),
            strict: self.shared.strict_state,
        });
    }

    /// Wait for the single callback result.
    ///
    /// Can be consumed once; dropping the future abandons the result. Resolves
    /// as `Cancelled` when the listener is stopped first and as `Bind` when it
    /// stopped accepting on its own.
    pub async fn await_result(&mut self) -> AuthResult<CallbackResult> {
        let rx = self.result_rx.take().ok_or_else(|| {
            AuthError::InvalidStateTransition("callback result already consumed".to_string())
        })?;
        rx.await.map_err(|_| match self.shared.failure.lock().take() {
            Some(reason) => AuthError::Bind {
                port: self.port().unwrap_or_default(),
                reason,
            },
            None => AuthError::Cancelled("callback listener stopped".to_string()),
        })
    }

    /// Whether the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting and release the port. Idempotent; safe if never started.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.shared.result_tx.lock().take();

        // The handle stays in place until the task is gone so a drop during
        // this await can still hand it to `shutdown_now`.
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "callback listener task failed");
                }
            }
            self.task = None;
            if let Some(port) = self.port() {
                info!(port, "callback listener stopped");
            }
        }
    }

    /// Stop without waiting. The returned handle completes once the accept
    /// task, and with it the listening socket, has been dropped.
    pub(crate) fn shutdown_now(&mut self) -> Option<JoinHandle<()>> {
        self.shutdown.cancel();
        self.shared.result_tx.lock().take();
        let task = self.task.take()?;
        task.abort();
        Some(task)
    }
}

impl Default for CallbackListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        let _ = self.shutdown_now();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// One connection went away before we took it.
    Transient,
    /// Out of file descriptors; wait for some to be freed.
    Exhausted,
    Fatal,
}

fn classify_accept_error(e: &std::io::Error) -> AcceptFailure {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut => return AcceptFailure::Transient,
        _ => {}
    }
    // EMFILE / ENFILE on Unix, WSAEMFILE on Windows.
    match e.raw_os_error() {
        Some(23) | Some(24) | Some(10024) => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let shared = shared.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(socket, &shared).await {
                            debug!(peer = %peer, error = %e, "callback connection error");
                        }
                    });
                }
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Transient => debug!(error = %e, "callback accept interrupted"),
                    AcceptFailure::Exhausted => {
                        warn!(error = %e, "callback accept out of descriptors, backing off");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                    AcceptFailure::Fatal => {
                        warn!(error = %e, "callback accept failed, giving up");
                        shared.fail(format!("listener stopped accepting: {e}"));
                        break;
                    }
                },
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Dropping the listener releases the port; in-flight connections go with it.
    drop(listener);
    connections.shutdown().await;
}

struct Request {
    method: String,
    path: String,
    query: String,
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut reader = BufReader::new(socket);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    // Drain the header block so closing the socket does not reset the peer.
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.to_string(), String::new()),
    };

    Ok(Some(Request {
        method,
        path,
        query,
    }))
}

async fn handle_connection(mut socket: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let request = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut socket)).await
    {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!("callback connection timed out before sending a request");
            return Ok(());
        }
    };

    // The query string carries the token; only the path is logged.
    debug!(method = %request.method, path = %request.path, "callback request");

    if request.method != "GET" {
        return send_response(&mut socket, 405, "Method Not Allowed", "text/plain", "Method Not Allowed").await;
    }

    match request.path.as_str() {
        HEALTH_PATH => {
            send_response(&mut socket, 200, "OK", "application/json", r#"{"status":"ok"}"#).await
        }
        CALLBACK_PATH => {
            let params: HashMap<String, String> =
                url::form_urlencoded::parse(request.query.as_bytes())
                    .into_owned()
                    .collect();
            let expectation = shared.expectation.lock().clone();
            let result = classify(&params, expectation.as_ref());
            let page = result_page(&result);

            // Answer first: once resolved, the attempt may stop the listener
            // and abort this connection.
            let written =
                send_response(&mut socket, 200, "OK", "text/html; charset=utf-8", &page).await;

            if shared.resolve(result) {
                info!("authorization callback received");
            } else {
                debug!("duplicate authorization callback ignored");
            }
            written
        }
        _ => send_response(&mut socket, 404, "Not Found", "text/plain", "Not Found").await,
    }
}

/// Turn callback query parameters into a result.
fn classify(params: &HashMap<String, String>, expectation: Option<&Expectation>) -> CallbackResult {
    if let Some(code) = params.get("error") {
        return CallbackResult::ProviderError {
            code: code.clone(),
            description: params.get("error_description").cloned().unwrap_or_default(),
        };
    }

    let token = match params.get("token") {
        Some(token) if !token.is_empty() => token.clone(),
        _ => {
            return CallbackResult::Malformed {
                reason: "missing token".to_string(),
            }
        }
    };

    if let Some(expected) = expectation {
        let received = params.get("state");
        if received.map(String::as_str) != Some(expected.state.as_str()) {
            if expected.strict {
                warn!(state_present = received.is_some(), "callback state mismatch, rejecting");
                return CallbackResult::Malformed {
                    reason: "state mismatch".to_string(),
                };
            }
            // The provider does not reliably echo `state`.
            warn!(state_present = received.is_some(), "callback state mismatch, continuing");
        }
    }

    CallbackResult::Success { token }
}

async fn send_response(
    socket: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        content_type,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    let _ = socket.shutdown().await;
    Ok(())
}

fn result_page(result: &CallbackResult) -> String {
    match result {
        CallbackResult::Success { .. } => page(
            "Encore - Signed In",
            "#22c55e",
            "Authorization complete",
            "You can close this window and return to Encore.",
        ),
        CallbackResult::ProviderError { code, description } => {
            let detail = if description.is_empty() {
                code.clone()
            } else {
                format!("{code}: {description}")
            };
            page(
                "Encore - Authorization Failed",
                "#ef4444",
                "Authorization failed",
                &format!("Error: {}", html_escape(&detail)),
            )
        }
        CallbackResult::Malformed { reason } => page(
            "Encore - Authorization Failed",
            "#ef4444",
            "Authorization failed",
            &format!("Error: {}", html_escape(reason)),
        ),
    }
}

fn page(title: &str, color: &str, heading: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px; background: #f5f5f5;">
<div style="max-width: 400px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);">
<h1 style="color: {color}; margin-bottom: 20px;">{heading}</h1>
<p style="color: #666;">{message}</p>
</div>
</body>
</html>"#
    )
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expect(state: &str, strict: bool) -> Expectation {
        Expectation {
            state: state.to_string(),
            strict,
        }
    }

    /// Minimal HTTP/1.1 GET returning (status, body).
    async fn get(port: u16, target: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
        (status, body)
    }

    #[test]
    fn test_classify_error_wins() {
        let result = classify(
            &params(&[("error", "access_denied"), ("token", "abc")]),
            None,
        );
        assert_eq!(
            result,
            CallbackResult::ProviderError {
                code: "access_denied".into(),
                description: String::new()
            }
        );
    }

    #[test]
    fn test_classify_missing_token() {
        assert!(matches!(
            classify(&params(&[("state", "s")]), None),
            CallbackResult::Malformed { .. }
        ));
        assert!(matches!(
            classify(&params(&[("token", "")]), None),
            CallbackResult::Malformed { .. }
        ));
    }

    #[test]
    fn test_classify_state_is_advisory_by_default() {
        let result = classify(
            &params(&[("token", "abc123"), ("state", "other")]),
            Some(&expect("mine", false)),
        );
        assert_eq!(result, CallbackResult::Success { token: "abc123".into() });

        let result = classify(&params(&[("token", "abc123")]), Some(&expect("mine", false)));
        assert_eq!(result, CallbackResult::Success { token: "abc123".into() });
    }

    #[test]
    fn test_classify_strict_state() {
        let strict = expect("mine", true);
        assert_eq!(
            classify(&params(&[("token", "t"), ("state", "other")]), Some(&strict)),
            CallbackResult::Malformed {
                reason: "state mismatch".into()
            }
        );
        assert_eq!(
            classify(&params(&[("token", "t")]), Some(&strict)),
            CallbackResult::Malformed {
                reason: "state mismatch".into()
            }
        );
        assert_eq!(
            classify(&params(&[("token", "t"), ("state", "mine")]), Some(&strict)),
            CallbackResult::Success { token: "t".into() }
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", CallbackResult::Success { token: "abc123".into() });
        assert!(!debug.contains("abc123"));
    }

    #[test]
    fn test_error_page_is_escaped() {
        let page = result_page(&CallbackResult::ProviderError {
            code: "x".into(),
            description: "<script>alert(1)</script>".into(),
        });
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn test_callback_resolves_with_token() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();
        listener.arm_expectation("csrf");

        let (status, body) = get(port, "/callback?token=abc123&state=csrf").await;
        assert_eq!(status, 200);
        assert!(body.contains("Authorization complete"));

        let result = listener.await_result().await.unwrap();
        assert_eq!(result, CallbackResult::Success { token: "abc123".into() });

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_percent_encoded_values_are_decoded() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        get(port, "/callback?error=access_denied&error_description=User%20said+no").await;

        let result = listener.await_result().await.unwrap();
        assert_eq!(
            result,
            CallbackResult::ProviderError {
                code: "access_denied".into(),
                description: "User said no".into()
            }
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_second_callback_is_answered_but_ignored() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        let (first, _) = get(port, "/callback?token=first").await;
        let (second, _) = get(port, "/callback?token=second").await;
        assert_eq!(first, 200);
        assert_eq!(second, 200);

        let result = listener.await_result().await.unwrap();
        assert_eq!(result, CallbackResult::Success { token: "first".into() });
        assert!(listener.await_result().await.is_err());
        assert!(listener.is_running());

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_health_and_unknown_paths_never_resolve() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        let (status, body) = get(port, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"status":"ok"}"#);

        let (status, _) = get(port, "/favicon.ico").await;
        assert_eq!(status, 404);

        let wait = tokio::time::timeout(Duration::from_millis(100), listener.await_result()).await;
        assert!(wait.is_err(), "no result should be available");

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"POST /callback?token=abc HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 405"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port_and_is_idempotent() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_running());

        let rebound = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(rebound.is_ok(), "port should be free after stop");
    }

    #[tokio::test]
    async fn test_stop_before_start_is_safe() {
        let mut listener = CallbackListener::new();
        listener.stop().await;
        assert!(listener.port().is_none());
        assert!(listener.start(0).await.is_err());
    }

    #[tokio::test]
    async fn test_await_result_after_stop_is_cancelled() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        listener.stop().await;

        let err = listener.await_result().await.unwrap_err();
        assert!(matches!(err, AuthError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_shutdown_now_handle_completes_after_port_release() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        let task = listener.shutdown_now().unwrap();
        let _ = task.await;
        assert!(TcpListener::bind(("127.0.0.1", port)).await.is_ok());
        assert!(listener.shutdown_now().is_none());
    }

    #[test]
    fn test_accept_errors_are_classified() {
        use std::io::{Error, ErrorKind};

        assert_eq!(
            classify_accept_error(&Error::from(ErrorKind::ConnectionAborted)),
            AcceptFailure::Transient
        );
        assert_eq!(
            classify_accept_error(&Error::from(ErrorKind::ConnectionReset)),
            AcceptFailure::Transient
        );
        assert_eq!(
            classify_accept_error(&Error::from_raw_os_error(24)),
            AcceptFailure::Exhausted
        );
        assert_eq!(
            classify_accept_error(&Error::from(ErrorKind::PermissionDenied)),
            AcceptFailure::Fatal
        );
    }

    #[tokio::test]
    async fn test_accept_failure_wakes_waiter() {
        let mut listener = CallbackListener::new();
        listener.start(0).await.unwrap();
        let port = listener.port().unwrap();

        listener
            .shared
            .fail("listener stopped accepting: boom".to_string());

        let err = tokio::time::timeout(Duration::from_secs(1), listener.await_result())
            .await
            .expect("waiter should wake without a callback")
            .unwrap_err();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut listener = CallbackListener::new();
        let err = listener.start(port).await.unwrap_err();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
    }
}
