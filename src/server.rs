//! Server configuration
//!
//! [`McpServer`] is the immutable blueprint a transport stamps sessions
//! from: server identity, the initial tool/prompt/resource registries,
//! completion handlers, middleware, and tuning knobs. Each connection gets
//! its own [`Session`](crate::session::Session) via [`McpServer::session`];
//! the configuration is shared, the per-connection state is not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{BoxFuture, Middleware};
use crate::exchange::{Exchange, Extensions};
use crate::outbound::DEFAULT_REQUEST_TIMEOUT;
use crate::prompt::Prompt;
use crate::protocol::{CompleteResult, CompletionReference, LogLevel};
use crate::resource::{ResourceProvider, ResourceTemplate};
use crate::session::Session;
use crate::tool::Tool;

/// Handler for a specific completion reference: `(exchange, argument
/// name, argument value)`.
pub type CompletionFn = Arc<
    dyn Fn(Exchange, String, String) -> BoxFuture<'static, crate::error::Result<CompleteResult>>
        + Send
        + Sync,
>;

/// Fallback completion handler: `(exchange, ref type, ref name, argument
/// name, argument value)`.
pub type DefaultCompletionFn = Arc<
    dyn Fn(
            Exchange,
            String,
            String,
            String,
            String,
        ) -> BoxFuture<'static, crate::error::Result<CompleteResult>>
        + Send
        + Sync,
>;

/// Invoked when the client announces `notifications/roots/list_changed`
/// (after the cached roots have been invalidated).
pub type RootsChangedFn = Arc<dyn Fn(Session) + Send + Sync>;

/// Server identity advertised at initialize time
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    /// Usage hints returned with the initialize response
    pub instructions: Option<String>,
    /// Whether the `logging` capability is advertised
    pub logging: bool,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "conduit-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            logging: false,
        }
    }
}

/// Immutable server blueprint shared across sessions
#[derive(Clone, Default)]
pub struct McpServer {
    pub(crate) info: ServerInfo,
    pub(crate) tools: Vec<Tool>,
    pub(crate) prompts: Vec<Prompt>,
    pub(crate) resources: Option<Arc<dyn ResourceProvider>>,
    pub(crate) resource_templates: Vec<ResourceTemplate>,
    pub(crate) completions: HashMap<(String, String), CompletionFn>,
    pub(crate) default_completion: Option<DefaultCompletionFn>,
    pub(crate) roots_changed: Option<RootsChangedFn>,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) error_log_level: LogLevel,
    pub(crate) request_timeout: Duration,
    pub(crate) extensions: Extensions,
}

impl McpServer {
    pub fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            error_log_level: LogLevel::Info,
            ..Default::default()
        }
    }

    /// Set the server name and version
    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info.name = name.into();
        self.info.version = version.into();
        self
    }

    /// Set instructions for LLMs describing how to use this server
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.info.instructions = Some(instructions.into());
        self
    }

    /// Advertise the `logging` capability; `logging/setLevel` works either
    /// way, but clients only discover it when this is set.
    pub fn with_logging(mut self) -> Self {
        self.info.logging = true;
        self
    }

    /// Register a tool
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register multiple tools at once
    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Register a prompt
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Register multiple prompts at once
    pub fn prompts(mut self, prompts: impl IntoIterator<Item = Prompt>) -> Self {
        self.prompts.extend(prompts);
        self
    }

    /// Install the resources provider. Without one, every `resources/*`
    /// request answers Invalid Params.
    pub fn resources(mut self, provider: impl ResourceProvider + 'static) -> Self {
        self.resources = Some(Arc::new(provider));
        self
    }

    /// Register a resource template
    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.resource_templates.push(template);
        self
    }

    /// Register a completion handler for a specific prompt or resource
    /// reference.
    ///
    /// # Example
    ///
    /// ```rust
    /// use conduit_mcp::{McpServer, CompleteResult};
    /// use conduit_mcp::protocol::CompletionReference;
    ///
    /// let server = McpServer::new().completion(
    ///     CompletionReference::prompt("greet"),
    ///     |_exchange, _arg_name, value| async move {
    ///         let all = vec!["alice".to_string(), "bob".to_string()];
    ///         Ok(CompleteResult::new(
    ///             all.into_iter().filter(|v| v.starts_with(&value)).collect(),
    ///         ))
    ///     },
    /// );
    /// # let _ = server;
    /// ```
    pub fn completion<F, Fut>(mut self, reference: CompletionReference, handler: F) -> Self
    where
        F: Fn(Exchange, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<CompleteResult>> + Send + 'static,
    {
        let key = (
            reference.ref_type().to_string(),
            reference.ref_name().to_string(),
        );
        self.completions.insert(
            key,
            Arc::new(move |exchange, name, value| Box::pin(handler(exchange, name, value))),
        );
        self
    }

    /// Register the fallback completion handler, consulted when no
    /// reference-specific handler matches.
    pub fn default_completion<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Exchange, String, String, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<CompleteResult>> + Send + 'static,
    {
        self.default_completion = Some(Arc::new(move |exchange, rt, rn, an, av| {
            Box::pin(handler(exchange, rt, rn, an, av))
        }));
        self
    }

    /// Register a callback for `notifications/roots/list_changed`
    pub fn on_roots_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(Session) + Send + Sync + 'static,
    {
        self.roots_changed = Some(Arc::new(callback));
        self
    }

    /// Append a middleware to the dispatch stack. The first middleware
    /// added is outermost (after the built-in error middleware).
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Level at which the error middleware logs handler failures
    pub fn error_log_level(mut self, level: LogLevel) -> Self {
        self.error_log_level = level;
        self
    }

    /// Timeout for server-originated requests (default 120s)
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Attach user state, readable from any handler via
    /// [`Exchange::state`](crate::exchange::Exchange::state).
    pub fn state<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Create a fresh session from this blueprint. Transports call this
    /// once per connection.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.info.name)
            .field("version", &self.info.version)
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("has_resources", &self.resources.is_some())
            .finish()
    }
}
