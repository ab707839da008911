//! Streamable HTTP transport for MCP
//!
//! One endpoint, three verbs:
//!
//! - `POST /` carries JSON-RPC from the client. A POST without a session
//!   id may only be `initialize`; it creates the session and returns the
//!   id in the `Mcp-Session-Id` response header.
//! - `GET /` opens the SSE stream that delivers everything the session
//!   emits: responses, notifications, and server-originated requests.
//!   Frames are `data: <json>\n\n`; when an endpoint URL is configured
//!   the first frame is `event: endpoint`.
//! - `DELETE /` removes the session.
//!
//! Messages produced while no stream is attached accumulate in a backlog
//! queue and are flushed on (re)attach. A newly attached stream supersedes
//! the previous one, which terminates.
//!
//! Origin validation follows the allow-list: requests without an `Origin`
//! header and localhost origins are accepted, anything else must match the
//! configured list or is answered with 403.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response, Sse, sse::Event, sse::KeepAlive},
    routing::get,
};
use tokio::sync::{Notify, RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};
use crate::server::McpServer;
use crate::session::Session;

/// Header name for the MCP session id
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Fallback query parameter for the session id on GET
const SESSION_ID_QUERY: &str = "sessionId";

/// Default session TTL (30 minutes)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Default cleanup interval (1 minute)
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for session management
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time-to-live for inactive sessions
    pub ttl: Duration,
    /// Maximum number of sessions (None = unlimited)
    pub max_sessions: Option<usize>,
    /// How often to run the cleanup task
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            max_sessions: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// The per-session SSE backlog. Shared between the session's write
/// callback and the currently attached stream.
struct OutboundQueue {
    messages: StdMutex<VecDeque<String>>,
    notify: Notify,
    /// Bumped on every stream attach; a pump whose epoch is stale exits,
    /// closing the superseded stream.
    epoch: AtomicU64,
}

impl OutboundQueue {
    fn new() -> Self {
        Self {
            messages: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
            epoch: AtomicU64::new(0),
        }
    }

    fn push(&self, text: String) {
        self.messages
            .lock()
            .expect("backlog queue poisoned")
            .push_back(text);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<String> {
        self.messages
            .lock()
            .expect("backlog queue poisoned")
            .pop_front()
    }
}

/// One HTTP client session
struct HttpSession {
    id: String,
    session: Session,
    queue: Arc<OutboundQueue>,
    last_accessed: StdMutex<Instant>,
}

impl HttpSession {
    fn new(server: &McpServer) -> Arc<Self> {
        let session = server.session();
        let queue = Arc::new(OutboundQueue::new());

        let sink_queue = queue.clone();
        session.connect(Arc::new(move |text: String| {
            sink_queue.push(text);
        }));

        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            session,
            queue,
            last_accessed: StdMutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_accessed.lock().expect("access clock poisoned") = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_accessed
            .lock()
            .expect("access clock poisoned")
            .elapsed()
            > ttl
    }
}

struct AppState {
    server: McpServer,
    sessions: RwLock<HashMap<String, Arc<HttpSession>>>,
    config: SessionConfig,
    validate_origin: bool,
    allowed_origins: Vec<String>,
    endpoint: Option<String>,
}

impl AppState {
    async fn get_session(&self, id: &str) -> Option<Arc<HttpSession>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id).cloned();
        if let Some(s) = &session {
            s.touch();
        }
        session
    }

    async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let ttl = self.config.ttl;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            tracing::debug!(session_id = %id, "expired session removed");
        }
        expired.len()
    }
}

/// HTTP transport for MCP servers
///
/// # Example
///
/// ```rust,no_run
/// use conduit_mcp::{McpServer, transport::http::HttpTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = McpServer::new().server_info("my-server", "1.0.0");
///     HttpTransport::new(server)
///         .allowed_origins(vec!["https://example.com".to_string()])
///         .serve("127.0.0.1:3000")
///         .await?;
///     Ok(())
/// }
/// ```
pub struct HttpTransport {
    server: McpServer,
    validate_origin: bool,
    allowed_origins: Vec<String>,
    session_config: SessionConfig,
    endpoint: Option<String>,
}

impl HttpTransport {
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            validate_origin: true,
            allowed_origins: Vec::new(),
            session_config: SessionConfig::default(),
            endpoint: None,
        }
    }

    /// Disable Origin header validation (not recommended for production)
    pub fn disable_origin_validation(mut self) -> Self {
        self.validate_origin = false;
        self
    }

    /// Set allowed origins. Localhost origins are always accepted.
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Configure session management (TTL, max sessions, cleanup interval)
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Set the session TTL (convenience method)
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_config.ttl = ttl;
        self
    }

    /// Cap the number of concurrent sessions (convenience method)
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.session_config.max_sessions = Some(max);
        self
    }

    /// Configure the POST endpoint URL announced as the first SSE frame
    /// (`event: endpoint`). Without this, no endpoint frame is sent.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    fn build_state(&self) -> Arc<AppState> {
        let state = Arc::new(AppState {
            server: self.server.clone(),
            sessions: RwLock::new(HashMap::new()),
            config: self.session_config.clone(),
            validate_origin: self.validate_origin,
            allowed_origins: self.allowed_origins.clone(),
            endpoint: self.endpoint.clone(),
        });

        let cleanup_state = state.clone();
        let interval = self.session_config.cleanup_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = cleanup_state.cleanup_expired().await;
                if removed > 0 {
                    tracing::info!(removed, "session cleanup completed");
                }
            }
        });

        state
    }

    /// Build the axum router for this transport
    pub fn into_router(self) -> Router {
        let state = self.build_state();
        Router::new()
            .route(
                "/",
                get(handle_get).post(handle_post).delete(handle_delete),
            )
            .route("/health", get(handle_health))
            .with_state(state)
    }

    /// Serve the transport on the given address
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("MCP HTTP transport listening on {}", addr);

        axum::serve(listener, self.into_router())
            .await
            .map_err(|e| Error::Transport(format!("Server error: {}", e)))
    }
}

/// Check if an origin is a localhost origin (safe from DNS rebinding)
fn is_localhost_origin(origin: &str) -> bool {
    if let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    {
        let host = rest.split(':').next().unwrap_or(rest);
        matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
    } else {
        false
    }
}

/// Whether a request with this Origin header may proceed
fn origin_allowed(origin: Option<&str>, validate: bool, allowed: &[String]) -> bool {
    if !validate {
        return true;
    }
    let Some(origin) = origin else {
        // No Origin header: same-origin or non-browser client
        return true;
    };
    if is_localhost_origin(origin) {
        return true;
    }
    allowed.iter().any(|o| o == origin || o == "*")
}

fn check_origin(headers: &HeaderMap, state: &AppState) -> Option<Response> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if origin_allowed(origin, state.validate_origin, &state.allowed_origins) {
        None
    } else {
        Some((StatusCode::FORBIDDEN, "Origin not allowed").into_response())
    }
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether the body is a single `initialize` request
fn is_initialize_request(body: &serde_json::Value) -> bool {
    body.get("method").and_then(|m| m.as_str()) == Some("initialize")
}

/// Handle POST requests (JSON-RPC messages from the client)
async fn handle_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(resp) = check_origin(&headers, &state) {
        return resp;
    }

    if let Some(session_id) = header_session_id(&headers) {
        let Some(http_session) = state.get_session(&session_id).await else {
            return (StatusCode::NOT_FOUND, "Unknown session").into_response();
        };
        http_session.session.ingest(&body).await;
        return StatusCode::ACCEPTED.into_response();
    }

    // Without a session id, only initialize is routable
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Invalid JSON body").into_response();
        }
    };
    if !is_initialize_request(&parsed) {
        return (
            StatusCode::BAD_REQUEST,
            "Missing Mcp-Session-Id header",
        )
            .into_response();
    }

    {
        let sessions = state.sessions.read().await;
        if let Some(max) = state.config.max_sessions
            && sessions.len() >= max
        {
            tracing::warn!(max_sessions = max, "session limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "Session limit reached").into_response();
        }
    }

    let http_session = HttpSession::new(&state.server);
    let session_id = http_session.id.clone();
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), http_session.clone());
    tracing::debug!(session_id = %session_id, "created new session");

    http_session.session.ingest(&body).await;

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

/// Handle GET requests: attach the SSE stream
async fn handle_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(resp) = check_origin(&headers, &state) {
        return resp;
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");
    if !accept.contains("text/event-stream") && !accept.contains("*/*") {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Accept header must include text/event-stream",
        )
            .into_response();
    }

    let session_id = header_session_id(&headers).or_else(|| query.get(SESSION_ID_QUERY).cloned());
    let Some(session_id) = session_id else {
        return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response();
    };
    let Some(http_session) = state.get_session(&session_id).await else {
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };

    // Supersede any previously attached stream
    let queue = http_session.queue.clone();
    let epoch = queue.epoch.fetch_add(1, Ordering::AcqRel) + 1;
    queue.notify.notify_waiters();

    let (tx, rx) = mpsc::channel::<std::result::Result<Event, Infallible>>(64);

    if let Some(endpoint) = &state.endpoint {
        let url = format!("{}?{}={}", endpoint, SESSION_ID_QUERY, session_id);
        let _ = tx.send(Ok(Event::default().event("endpoint").data(url))).await;
    }

    tokio::spawn(pump_events(queue, epoch, tx));

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("ping"),
        )
        .into_response()
}

/// Forward queued messages to the attached stream until it is superseded
/// or the client disconnects. Drains the backlog first, then follows live
/// traffic.
async fn pump_events(
    queue: Arc<OutboundQueue>,
    epoch: u64,
    tx: mpsc::Sender<std::result::Result<Event, Infallible>>,
) {
    loop {
        let notified = queue.notify.notified();
        if queue.epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!("SSE stream superseded by a newer attach");
            break;
        }
        if let Some(message) = queue.pop() {
            if tx.send(Ok(Event::default().data(message))).await.is_err() {
                break;
            }
            continue;
        }
        notified.await;
    }
}

/// Handle DELETE requests: remove the session
async fn handle_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(resp) = check_origin(&headers, &state) {
        return resp;
    }
    let Some(session_id) = header_session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response();
    };
    let removed = state.sessions.write().await.remove(&session_id).is_some();
    if removed {
        tracing::debug!(session_id = %session_id, "session removed");
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Unknown session").into_response()
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_origins() {
        assert!(is_localhost_origin("http://localhost"));
        assert!(is_localhost_origin("http://localhost:3000"));
        assert!(is_localhost_origin("http://127.0.0.1:8080"));
        assert!(is_localhost_origin("https://[::1]:3000"));
        assert!(!is_localhost_origin("https://evil.example.com"));
        assert!(!is_localhost_origin("localhost"));
    }

    #[test]
    fn test_origin_allow_list() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(origin_allowed(None, true, &allowed));
        assert!(origin_allowed(Some("http://localhost:3000"), true, &allowed));
        assert!(origin_allowed(
            Some("https://app.example.com"),
            true,
            &allowed
        ));
        assert!(!origin_allowed(Some("https://evil.com"), true, &allowed));
        assert!(origin_allowed(Some("https://evil.com"), false, &allowed));

        let wildcard = vec!["*".to_string()];
        assert!(origin_allowed(Some("https://evil.com"), true, &wildcard));

        let empty: Vec<String> = Vec::new();
        assert!(!origin_allowed(Some("https://app.example.com"), true, &empty));
    }

    #[test]
    fn test_is_initialize_request() {
        assert!(is_initialize_request(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}
        })));
        assert!(!is_initialize_request(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "ping"
        })));
    }

    #[tokio::test]
    async fn test_backlog_queue_flushes_on_attach() {
        let queue = Arc::new(OutboundQueue::new());
        queue.push("first".to_string());
        queue.push("second".to_string());

        let epoch = queue.epoch.load(Ordering::Acquire);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(pump_events(queue.clone(), epoch, tx));

        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        // Events carry the queued payloads in order
        let _ = (first, second);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_new_attach_supersedes_old_pump() {
        let queue = Arc::new(OutboundQueue::new());
        let old_epoch = queue.epoch.load(Ordering::Acquire);
        let (tx, mut rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_events(queue.clone(), old_epoch, tx));

        // A new attach bumps the epoch and wakes the old pump
        queue.epoch.fetch_add(1, Ordering::AcqRel);
        queue.notify.notify_waiters();

        pump.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let server = McpServer::new();
        let session = HttpSession::new(&server);
        assert!(!session.is_expired(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(session.is_expired(Duration::from_millis(1)));
    }
}
