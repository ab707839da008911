//! The per-connection session core
//!
//! A [`Session`] owns everything scoped to one client connection: the
//! lifecycle state machine, the negotiated client identity and
//! capabilities, the tool/prompt registries, the in-flight inbound request
//! table, the outbound correlation table, and the transport write
//! callback. Transports feed raw message text to [`Session::ingest`] and
//! install their write side with [`Session::connect`].
//!
//! The state machine follows the specification lifecycle:
//! Uninitialized -> Initializing (initialize responded) -> Initialized
//! (`notifications/initialized` received). Transitions use atomic
//! compare-and-set; change notifications are emitted at the mutation
//! sites that alter the registries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::dispatch::{
    Dispatcher, INIT_EXEMPT_METHODS, Middleware, handler, with_error, with_init_check,
};
use crate::error::{Error, JsonRpcError, Result};
use crate::exchange::{CancelSignal, Exchange};
use crate::outbound::{OutboundTable, ProgressCallback};
use crate::prompt::Prompt;
use crate::protocol::{
    ClientCapabilities, Implementation, LogLevel, RequestId, RequestMeta, Root, methods,
    notifications,
};
use crate::resource::{ResourceProvider, ResourceTemplate};
use crate::server::{CompletionFn, DefaultCompletionFn, McpServer, RootsChangedFn, ServerInfo};
use crate::tool::Tool;
use crate::wire::{ParsedItem, parse_message};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Initial state; initialize has not succeeded yet
    Uninitialized = 0,
    /// Server has responded to `initialize`, waiting for the
    /// `initialized` notification
    Initializing = 1,
    /// `initialized` notification received, normal operation
    Initialized = 2,
}

impl From<u8> for SessionPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => SessionPhase::Initializing,
            2 => SessionPhase::Initialized,
            _ => SessionPhase::Uninitialized,
        }
    }
}

/// Client identity and capabilities recorded at initialize time
#[derive(Debug, Clone)]
pub struct NegotiatedClient {
    pub info: Implementation,
    pub capabilities: ClientCapabilities,
    pub protocol_version: String,
}

/// The transport write callback. Invoked once per serialized envelope;
/// the transport is the serialization point for concurrent writers.
pub type OutboundSink = Arc<dyn Fn(String) + Send + Sync>;

pub(crate) struct SessionInner {
    info: ServerInfo,
    dispatch: Dispatcher,
    tools: RwLock<HashMap<String, Arc<Tool>>>,
    prompts: RwLock<HashMap<String, Arc<Prompt>>>,
    resources: Option<Arc<dyn ResourceProvider>>,
    resource_templates: Vec<Arc<ResourceTemplate>>,
    completions: HashMap<(String, String), CompletionFn>,
    default_completion: Option<DefaultCompletionFn>,
    roots_changed: Option<RootsChangedFn>,
    logging_level: RwLock<Option<LogLevel>>,
    client: RwLock<Option<NegotiatedClient>>,
    phase: AtomicU8,
    /// Memoized roots; the tokio mutex is held across the fetch so the
    /// producer is single-flight
    roots: Arc<tokio::sync::Mutex<Option<Vec<Root>>>>,
    subscriptions: RwLock<HashSet<String>>,
    in_flight: Mutex<HashMap<RequestId, CancelSignal>>,
    outbound: OutboundTable,
    sink: RwLock<Option<OutboundSink>>,
    extensions: crate::exchange::Extensions,
}

/// Per-connection session handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(server: McpServer) -> Self {
        let tools = server
            .tools
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();
        let prompts = server
            .prompts
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        let dispatch = build_dispatcher(server.error_log_level, &server.middleware);

        Self {
            inner: Arc::new(SessionInner {
                info: server.info,
                dispatch,
                tools: RwLock::new(tools),
                prompts: RwLock::new(prompts),
                resources: server.resources,
                resource_templates: server
                    .resource_templates
                    .into_iter()
                    .map(Arc::new)
                    .collect(),
                completions: server.completions,
                default_completion: server.default_completion,
                roots_changed: server.roots_changed,
                logging_level: RwLock::new(None),
                client: RwLock::new(None),
                phase: AtomicU8::new(SessionPhase::Uninitialized as u8),
                roots: Arc::new(tokio::sync::Mutex::new(None)),
                subscriptions: RwLock::new(HashSet::new()),
                in_flight: Mutex::new(HashMap::new()),
                outbound: OutboundTable::new(server.request_timeout),
                sink: RwLock::new(None),
                extensions: server.extensions,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.inner.phase.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == SessionPhase::Initialized
    }

    /// Transition Uninitialized -> Initializing. Returns false when the
    /// session already left the fresh state (a second initialize).
    pub(crate) fn mark_initializing(&self) -> bool {
        self.inner
            .phase
            .compare_exchange(
                SessionPhase::Uninitialized as u8,
                SessionPhase::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Transition to Initialized. Idempotent and never downgrades.
    ///
    /// Also accepts Uninitialized -> Initialized: over HTTP the
    /// `initialized` notification can arrive before the initialize
    /// request has finished processing.
    pub(crate) fn mark_initialized(&self) -> bool {
        for from in [SessionPhase::Initializing, SessionPhase::Uninitialized] {
            if self
                .inner
                .phase
                .compare_exchange(
                    from as u8,
                    SessionPhase::Initialized as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    pub(crate) fn store_client(&self, client: NegotiatedClient) {
        *self.inner.client.write().expect("client slot poisoned") = Some(client);
    }

    /// The client implementation info, once initialize has been seen
    pub fn client_info(&self) -> Option<Implementation> {
        self.inner
            .client
            .read()
            .expect("client slot poisoned")
            .as_ref()
            .map(|c| c.info.clone())
    }

    /// The client capabilities, once initialize has been seen
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.inner
            .client
            .read()
            .expect("client slot poisoned")
            .as_ref()
            .map(|c| c.capabilities.clone())
    }

    /// The negotiated protocol version, once initialize has been seen
    pub fn protocol_version(&self) -> Option<String> {
        self.inner
            .client
            .read()
            .expect("client slot poisoned")
            .as_ref()
            .map(|c| c.protocol_version.clone())
    }

    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.inner.info
    }

    /// User state installed on the server builder
    pub fn state<T: Send + Sync + Clone + 'static>(&self) -> Option<T> {
        self.inner.extensions.get::<T>().cloned()
    }

    // -------------------------------------------------------------------------
    // Transport wiring
    // -------------------------------------------------------------------------

    /// Install the transport write callback, replacing any previous one.
    /// The old sink is dropped, which closes transports that watch for it.
    pub fn connect(&self, sink: OutboundSink) {
        let previous = self
            .inner
            .sink
            .write()
            .expect("sink slot poisoned")
            .replace(sink);
        if previous.is_some() {
            tracing::debug!("output sink replaced, previous writer released");
        }
    }

    /// Clear the write callback (transport EOF).
    pub fn disconnect(&self) {
        self.inner.sink.write().expect("sink slot poisoned").take();
    }

    pub(crate) fn send_text(&self, text: String) -> bool {
        let sink = self
            .inner
            .sink
            .read()
            .expect("sink slot poisoned")
            .clone();
        match sink {
            Some(sink) => {
                sink(text);
                true
            }
            None => {
                tracing::debug!("no transport attached, outbound message dropped");
                false
            }
        }
    }

    /// Send a notification envelope to the client.
    pub fn send_notification(&self, method: &str, params: Value) -> bool {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.send_text(envelope.to_string())
    }

    // -------------------------------------------------------------------------
    // Ingest & dispatch
    // -------------------------------------------------------------------------

    /// Feed one inbound message text (an envelope or a batch array).
    ///
    /// Any responses are written through the connected sink: a single
    /// envelope per request, or one array for a batch with at least one
    /// response. The outbound timeout sweep piggybacks on this call, so
    /// no background timer is needed.
    pub async fn ingest(&self, text: &str) {
        self.inner.outbound.sweep();

        let parsed = parse_message(text);
        if parsed.batch {
            let futures: Vec<_> = parsed
                .items
                .into_iter()
                .map(|item| self.dispatch_item(item))
                .collect();
            let responses: Vec<Value> = join_all(futures).await.into_iter().flatten().collect();
            if !responses.is_empty() {
                self.send_text(Value::Array(responses).to_string());
            }
        } else {
            for item in parsed.items {
                if let Some(response) = self.dispatch_item(item).await {
                    self.send_text(response.to_string());
                }
            }
        }
    }

    /// Dispatch one parsed item, returning the response envelope for
    /// requests that produce one.
    async fn dispatch_item(&self, item: ParsedItem) -> Option<Value> {
        match item {
            ParsedItem::ParseError { id, error } => Some(error_envelope(id, error)),

            ParsedItem::ClientResponse { id, result, error } => {
                self.handle_client_response(id, result, error);
                None
            }

            ParsedItem::Notification { method, params } => {
                let Some(handler) = self.inner.dispatch.get(&method) else {
                    tracing::debug!(method = %method, "unknown notification ignored");
                    return None;
                };
                let meta = extract_meta(&params);
                let exchange = Exchange::new(self.clone(), None, meta, CancelSignal::new());
                if let Err(e) = handler(exchange, params).await {
                    tracing::debug!(method = %method, error = %e, "notification handler failed");
                }
                None
            }

            ParsedItem::Request { id, method, params } => {
                let Some(handler) = self.inner.dispatch.get(&method) else {
                    return Some(error_envelope(
                        Some(id),
                        JsonRpcError::method_not_found(&method),
                    ));
                };

                let cancel = CancelSignal::new();
                self.inner
                    .in_flight
                    .lock()
                    .expect("in-flight table poisoned")
                    .insert(id.clone(), cancel.clone());

                let meta = extract_meta(&params);
                let exchange =
                    Exchange::new(self.clone(), Some(id.clone()), meta, cancel.clone());
                let result = handler(exchange, params).await;

                self.inner
                    .in_flight
                    .lock()
                    .expect("in-flight table poisoned")
                    .remove(&id);

                // A response must never be written after the client
                // cancelled the request.
                if cancel.is_cancelled() {
                    tracing::debug!(request_id = ?id, "response suppressed after cancellation");
                    return None;
                }

                Some(match result {
                    Ok(value) => result_envelope(id, value),
                    Err(e) => error_envelope(Some(id), e.into_jsonrpc()),
                })
            }
        }
    }

    fn handle_client_response(
        &self,
        id: RequestId,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    ) {
        let id = match id {
            RequestId::Number(n) => n,
            other => {
                tracing::debug!(id = ?other, "client response with non-numeric id dropped");
                return;
            }
        };
        let outcome = match error {
            Some(err) => Err(Error::Client(err)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        if !self.inner.outbound.complete(id, outcome) {
            tracing::debug!(request_id = id, "client response for unknown request dropped");
        }
    }

    // -------------------------------------------------------------------------
    // Server-originated requests
    // -------------------------------------------------------------------------

    /// Send a request to the client.
    ///
    /// When a progress callback is given, a fresh token is registered and
    /// embedded in the outgoing `_meta.progressToken`; inbound
    /// `notifications/progress` frames bearing it invoke the callback
    /// until the request reaches any terminal state.
    pub fn send_client_request(
        &self,
        method: &str,
        mut params: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<PendingClientRequest> {
        let (id, token, rx) = self.inner.outbound.register(on_progress);

        if let Some(token) = token {
            if !params.is_object() {
                params = json!({});
            }
            params["_meta"]["progressToken"] = Value::String(token);
        }

        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if !self.send_text(envelope.to_string()) {
            self.inner.outbound.cancel(id);
            return Err(Error::Transport("no transport attached".to_string()));
        }

        Ok(PendingClientRequest { id, rx })
    }

    /// Cancel an outstanding server-originated request.
    ///
    /// With `notify_client`, a `notifications/cancelled` is sent so the
    /// client can stop working; otherwise cancellation is purely local.
    /// Any response that still arrives for the id is dropped.
    pub fn cancel_server_request(&self, id: i64, notify_client: bool) -> bool {
        if !self.inner.outbound.cancel(id) {
            return false;
        }
        if notify_client {
            self.send_notification(notifications::CANCELLED, json!({ "requestId": id }));
        }
        true
    }

    pub(crate) fn outbound(&self) -> &OutboundTable {
        &self.inner.outbound
    }

    pub(crate) fn roots_cache(&self) -> Arc<tokio::sync::Mutex<Option<Vec<Root>>>> {
        self.inner.roots.clone()
    }

    // -------------------------------------------------------------------------
    // Registry mutation & change notifications
    // -------------------------------------------------------------------------

    /// Add or replace a tool. Emits `notifications/tools/list_changed`
    /// when the session is initialized.
    pub fn add_tool(&self, tool: Tool) {
        self.inner
            .tools
            .write()
            .expect("tool registry poisoned")
            .insert(tool.name.clone(), Arc::new(tool));
        self.notify_tools_list_changed();
    }

    /// Remove a tool by name. Emits `notifications/tools/list_changed`
    /// when something was removed and the session is initialized.
    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = self
            .inner
            .tools
            .write()
            .expect("tool registry poisoned")
            .remove(name)
            .is_some();
        if removed {
            self.notify_tools_list_changed();
        }
        removed
    }

    /// Add or replace a prompt, with the same notification semantics as
    /// [`Session::add_tool`].
    pub fn add_prompt(&self, prompt: Prompt) {
        self.inner
            .prompts
            .write()
            .expect("prompt registry poisoned")
            .insert(prompt.name.clone(), Arc::new(prompt));
        self.notify_prompts_list_changed();
    }

    /// Remove a prompt by name.
    pub fn remove_prompt(&self, name: &str) -> bool {
        let removed = self
            .inner
            .prompts
            .write()
            .expect("prompt registry poisoned")
            .remove(name)
            .is_some();
        if removed {
            self.notify_prompts_list_changed();
        }
        removed
    }

    fn notify_tools_list_changed(&self) {
        if self.is_initialized() {
            self.send_notification(notifications::TOOLS_LIST_CHANGED, json!({}));
        }
    }

    fn notify_prompts_list_changed(&self) {
        if self.is_initialized() {
            self.send_notification(notifications::PROMPTS_LIST_CHANGED, json!({}));
        }
    }

    /// Announce that the resource catalogue changed. Emitted only when
    /// the session is initialized.
    pub fn notify_resources_list_changed(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        self.send_notification(notifications::RESOURCES_LIST_CHANGED, json!({}))
    }

    /// Announce that a specific resource changed.
    ///
    /// Emitted iff the session is initialized, the provider supports
    /// subscriptions, and the URI is currently subscribed.
    pub fn notify_resource_changed(&self, uri: &str) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let Some(provider) = &self.inner.resources else {
            return false;
        };
        if !provider.supports_subscriptions() || !self.is_subscribed(uri) {
            return false;
        }
        self.send_notification(notifications::RESOURCE_UPDATED, json!({ "uri": uri }))
    }

    /// Whether a resource URI is currently subscribed
    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.inner
            .subscriptions
            .read()
            .expect("subscription set poisoned")
            .contains(uri)
    }

    /// All currently subscribed URIs
    pub fn subscribed_uris(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .read()
            .expect("subscription set poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn subscribe(&self, uri: &str) {
        self.inner
            .subscriptions
            .write()
            .expect("subscription set poisoned")
            .insert(uri.to_string());
    }

    pub(crate) fn unsubscribe(&self, uri: &str) {
        self.inner
            .subscriptions
            .write()
            .expect("subscription set poisoned")
            .remove(uri);
    }

    /// The minimum log level set by the client, if any
    pub fn logging_level(&self) -> Option<LogLevel> {
        *self
            .inner
            .logging_level
            .read()
            .expect("logging level poisoned")
    }

    pub(crate) fn set_logging_level(&self, level: LogLevel) {
        *self
            .inner
            .logging_level
            .write()
            .expect("logging level poisoned") = Some(level);
    }

    #[cfg(test)]
    pub(crate) fn exchange_for_tests(&self) -> Exchange {
        Exchange::new(self.clone(), None, None, CancelSignal::new())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.inner.info.name)
            .field("phase", &self.phase())
            .field("pending_outbound", &self.inner.outbound.pending_count())
            .finish()
    }
}

/// An outstanding server-originated request
#[derive(Debug)]
pub struct PendingClientRequest {
    id: i64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingClientRequest {
    /// The allocated JSON-RPC id, usable with
    /// [`Session::cancel_server_request`]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wait for the client's response (or timeout / cancellation).
    pub async fn await_response(self) -> Result<Value> {
        self.rx
            .await
            .map_err(|_| Error::Transport("request abandoned before completion".to_string()))?
    }
}

fn result_envelope(id: RequestId, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_envelope(id: Option<RequestId>, error: JsonRpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

fn extract_meta(params: &Value) -> Option<RequestMeta> {
    params
        .get("_meta")
        .and_then(|meta| serde_json::from_value(meta.clone()).ok())
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::JsonRpc(JsonRpcError::invalid_params(e.to_string())))
}

/// Build the dispatch table once per session. The stack applied to each
/// entry is: error middleware (outermost), then the user middleware in
/// configuration order, then the initialization check for non-exempt
/// methods.
fn build_dispatcher(error_level: LogLevel, user_middleware: &[Middleware]) -> Dispatcher {
    let mut open_stack: Vec<Middleware> = vec![with_error(error_level)];
    open_stack.extend(user_middleware.iter().cloned());

    let mut checked_stack = open_stack.clone();
    checked_stack.push(with_init_check());

    let mut dispatcher = Dispatcher::new();
    let table: [(&'static str, crate::dispatch::Handler); 17] = [
        (methods::INITIALIZE, handler(handlers::initialize)),
        (methods::PING, handler(handlers::ping)),
        (methods::TOOLS_LIST, handler(handlers::tools_list)),
        (methods::TOOLS_CALL, handler(handlers::tools_call)),
        (methods::PROMPTS_LIST, handler(handlers::prompts_list)),
        (methods::PROMPTS_GET, handler(handlers::prompts_get)),
        (methods::RESOURCES_LIST, handler(handlers::resources_list)),
        (methods::RESOURCES_READ, handler(handlers::resources_read)),
        (
            methods::RESOURCES_SUBSCRIBE,
            handler(handlers::resources_subscribe),
        ),
        (
            methods::RESOURCES_UNSUBSCRIBE,
            handler(handlers::resources_unsubscribe),
        ),
        (
            methods::RESOURCES_TEMPLATES_LIST,
            handler(handlers::resources_templates_list),
        ),
        (
            methods::COMPLETION_COMPLETE,
            handler(handlers::completion_complete),
        ),
        (
            methods::LOGGING_SET_LEVEL,
            handler(handlers::logging_set_level),
        ),
        (notifications::INITIALIZED, handler(handlers::initialized)),
        (notifications::CANCELLED, handler(handlers::cancelled)),
        (notifications::PROGRESS, handler(handlers::progress)),
        (
            notifications::ROOTS_LIST_CHANGED,
            handler(handlers::roots_list_changed),
        ),
    ];

    for (method, entry) in table {
        let stack = if INIT_EXEMPT_METHODS.contains(&method) {
            &open_stack
        } else {
            &checked_stack
        };
        dispatcher.register(method, stack, entry);
    }
    dispatcher
}

mod handlers {
    //! Built-in method handlers. Each takes the per-request exchange and
    //! the raw params value, mirroring user handler signatures.

    use super::*;
    use crate::protocol::{
        CallToolParams, CompleteParams, CompletionsCapability, EmptyResult, GetPromptParams,
        InitializeParams, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
        ListToolsResult, LoggingCapability, PromptsCapability, ResourcesCapability,
        SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, SetLogLevelParams,
        SubscribeResourceParams, SubscriptionResult, ToolsCapability, UnsubscribeResourceParams,
    };

    pub(super) async fn initialize(exchange: Exchange, params: Value) -> Result<Value> {
        let p: InitializeParams = parse_params(params)?;
        let session = exchange.session();

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&p.protocol_version.as_str()) {
            return Err(Error::JsonRpc(
                JsonRpcError::invalid_request("Unsupported protocol version").with_data(json!({
                    "protocolVersion": p.protocol_version,
                    "supportedVersions": SUPPORTED_PROTOCOL_VERSIONS,
                })),
            ));
        }

        if !session.mark_initializing() {
            return Err(Error::JsonRpc(JsonRpcError::invalid_params(
                "Session is initialized already",
            )));
        }

        tracing::info!(
            client = %p.client_info.name,
            version = %p.client_info.version,
            protocol = %p.protocol_version,
            "client initializing"
        );

        session.store_client(NegotiatedClient {
            info: p.client_info,
            capabilities: p.capabilities,
            protocol_version: p.protocol_version.clone(),
        });

        let info = session.server_info();
        let result = InitializeResult {
            protocol_version: p.protocol_version,
            capabilities: capabilities(session),
            server_info: Implementation {
                name: info.name.clone(),
                version: info.version.clone(),
            },
            instructions: info.instructions.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Capability advertisement derived from the configured handlers.
    fn capabilities(session: &Session) -> ServerCapabilities {
        let inner = &session.inner;
        let has_tools = !inner.tools.read().expect("tool registry poisoned").is_empty();
        let has_prompts = !inner
            .prompts
            .read()
            .expect("prompt registry poisoned")
            .is_empty();
        let has_completions =
            !inner.completions.is_empty() || inner.default_completion.is_some();

        ServerCapabilities {
            tools: has_tools.then(|| ToolsCapability { list_changed: true }),
            prompts: has_prompts.then(|| PromptsCapability {
                list_changed: false,
            }),
            resources: inner.resources.as_ref().map(|p| ResourcesCapability {
                subscribe: p.supports_subscriptions(),
                list_changed: p.supports_list_changed(),
            }),
            logging: inner.info.logging.then(LoggingCapability::default),
            completions: has_completions.then(CompletionsCapability::default),
        }
    }

    pub(super) async fn ping(_exchange: Exchange, _params: Value) -> Result<Value> {
        Ok(serde_json::to_value(EmptyResult {})?)
    }

    pub(super) async fn initialized(exchange: Exchange, _params: Value) -> Result<Value> {
        if exchange.session().mark_initialized() {
            tracing::info!("session initialized, entering operation phase");
        }
        Ok(Value::Null)
    }

    pub(super) async fn tools_list(exchange: Exchange, _params: Value) -> Result<Value> {
        let mut tools: Vec<_> = {
            let registry = exchange
                .session()
                .inner
                .tools
                .read()
                .expect("tool registry poisoned");
            registry.values().map(|t| t.definition()).collect()
        };
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(serde_json::to_value(ListToolsResult {
            tools,
            next_cursor: None,
        })?)
    }

    pub(super) async fn tools_call(exchange: Exchange, params: Value) -> Result<Value> {
        let p: CallToolParams = parse_params(params)?;
        let tool = {
            let registry = exchange
                .session()
                .inner
                .tools
                .read()
                .expect("tool registry poisoned");
            registry.get(&p.name).cloned()
        };
        let Some(tool) = tool else {
            return Err(Error::JsonRpc(JsonRpcError::invalid_params(format!(
                "Tool {} not found",
                p.name
            ))));
        };

        tracing::debug!(tool = %p.name, "calling tool");
        let response = tool.call(exchange, p.arguments).await?;
        Ok(serde_json::to_value(response.into_result())?)
    }

    pub(super) async fn prompts_list(exchange: Exchange, _params: Value) -> Result<Value> {
        let mut prompts: Vec<_> = {
            let registry = exchange
                .session()
                .inner
                .prompts
                .read()
                .expect("prompt registry poisoned");
            registry.values().map(|p| p.definition()).collect()
        };
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(serde_json::to_value(ListPromptsResult {
            prompts,
            next_cursor: None,
        })?)
    }

    pub(super) async fn prompts_get(exchange: Exchange, params: Value) -> Result<Value> {
        let p: GetPromptParams = parse_params(params)?;
        let prompt = {
            let registry = exchange
                .session()
                .inner
                .prompts
                .read()
                .expect("prompt registry poisoned");
            registry.get(&p.name).cloned()
        };
        let Some(prompt) = prompt else {
            return Err(Error::JsonRpc(JsonRpcError::invalid_params(format!(
                "Prompt {} not found",
                p.name
            ))));
        };

        let response = prompt.get(exchange, p.arguments).await?;
        Ok(serde_json::to_value(response.into_result())?)
    }

    fn provider(session: &Session) -> Result<Arc<dyn ResourceProvider>> {
        session.inner.resources.clone().ok_or_else(|| {
            Error::JsonRpc(JsonRpcError::invalid_params("Resources are not supported"))
        })
    }

    pub(super) async fn resources_list(exchange: Exchange, params: Value) -> Result<Value> {
        let p: crate::protocol::ListResourcesParams = parse_params(params)?;
        let provider = provider(exchange.session())?;
        let result = provider.list(&exchange, p.cursor.as_deref()).await?;
        Ok(serde_json::to_value(result)?)
    }

    pub(super) async fn resources_read(exchange: Exchange, params: Value) -> Result<Value> {
        let p: crate::protocol::ReadResourceParams = parse_params(params)?;
        let provider = provider(exchange.session())?;

        if let Some(entry) = provider.get(&exchange, &p.uri).await? {
            tracing::debug!(uri = %p.uri, "reading resource");
            let result = entry.read(exchange).await?;
            return Ok(serde_json::to_value(result)?);
        }

        // Fall back to template matching
        let templates = exchange.session().inner.resource_templates.clone();
        for template in templates {
            if let Some(variables) = template.match_uri(&p.uri) {
                tracing::debug!(
                    uri = %p.uri,
                    template = %template.uri_template,
                    "reading resource via template"
                );
                let result = template.read(exchange, &p.uri, variables).await?;
                return Ok(serde_json::to_value(result)?);
            }
        }

        Err(Error::JsonRpc(JsonRpcError::resource_not_found(&p.uri)))
    }

    pub(super) async fn resources_subscribe(exchange: Exchange, params: Value) -> Result<Value> {
        let p: SubscribeResourceParams = parse_params(params)?;
        let provider = provider(exchange.session())?;
        provider.subscribe(&exchange, &p.uri).await?;
        exchange.session().subscribe(&p.uri);
        tracing::debug!(uri = %p.uri, "resource subscribed");
        Ok(serde_json::to_value(SubscriptionResult { uri: p.uri })?)
    }

    pub(super) async fn resources_unsubscribe(exchange: Exchange, params: Value) -> Result<Value> {
        let p: UnsubscribeResourceParams = parse_params(params)?;
        let provider = provider(exchange.session())?;
        provider.unsubscribe(&exchange, &p.uri).await?;
        exchange.session().unsubscribe(&p.uri);
        tracing::debug!(uri = %p.uri, "resource unsubscribed");
        Ok(serde_json::to_value(SubscriptionResult { uri: p.uri })?)
    }

    pub(super) async fn resources_templates_list(
        exchange: Exchange,
        _params: Value,
    ) -> Result<Value> {
        // Templates are served even without a provider: they are
        // configured directly on the server.
        let resource_templates = exchange
            .session()
            .inner
            .resource_templates
            .iter()
            .map(|t| t.definition())
            .collect();
        Ok(serde_json::to_value(ListResourceTemplatesResult {
            resource_templates,
            next_cursor: None,
        })?)
    }

    pub(super) async fn completion_complete(exchange: Exchange, params: Value) -> Result<Value> {
        let p: CompleteParams = parse_params(params)?;
        let ref_type = p.reference.ref_type().to_string();
        let ref_name = p.reference.ref_name().to_string();
        let session = exchange.session().clone();

        let key = (ref_type.clone(), ref_name.clone());
        if let Some(handler) = session.inner.completions.get(&key) {
            let result = handler(exchange, p.argument.name, p.argument.value).await?;
            return Ok(serde_json::to_value(result)?);
        }

        if let Some(fallback) = &session.inner.default_completion {
            let result = fallback(
                exchange,
                ref_type,
                ref_name,
                p.argument.name,
                p.argument.value,
            )
            .await?;
            return Ok(serde_json::to_value(result)?);
        }

        Err(Error::JsonRpc(JsonRpcError::invalid_params(format!(
            "Completion {}/{} not found",
            ref_type, ref_name
        ))))
    }

    pub(super) async fn logging_set_level(exchange: Exchange, params: Value) -> Result<Value> {
        let p: SetLogLevelParams = parse_params(params)?;
        tracing::debug!(level = %p.level, "client set logging level");
        exchange.session().set_logging_level(p.level);
        Ok(serde_json::to_value(EmptyResult {})?)
    }

    pub(super) async fn cancelled(exchange: Exchange, params: Value) -> Result<Value> {
        let p: crate::protocol::CancelledParams = parse_params(params)?;
        let signal = {
            let in_flight = exchange
                .session()
                .inner
                .in_flight
                .lock()
                .expect("in-flight table poisoned");
            in_flight.get(&p.request_id).cloned()
        };
        match signal {
            Some(signal) => {
                let reason = p.reason.unwrap_or_else(|| "cancelled".to_string());
                tracing::info!(request_id = ?p.request_id, reason = %reason, "request cancelled");
                signal.cancel(reason);
            }
            None => {
                tracing::debug!(
                    request_id = ?p.request_id,
                    "cancellation for unknown request ignored"
                );
            }
        }
        Ok(Value::Null)
    }

    pub(super) async fn progress(exchange: Exchange, params: Value) -> Result<Value> {
        let p: crate::protocol::ProgressParams = parse_params(params)?;
        exchange.session().outbound().dispatch_progress(&p);
        Ok(Value::Null)
    }

    pub(super) async fn roots_list_changed(exchange: Exchange, _params: Value) -> Result<Value> {
        let session = exchange.session().clone();
        session.roots_cache().lock().await.take();
        tracing::debug!("client roots changed, cache invalidated");
        if let Some(callback) = &session.inner.roots_changed {
            callback(session.clone());
        }
        Ok(Value::Null)
    }
}
