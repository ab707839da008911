//! Method dispatch and middleware composition
//!
//! The dispatch table maps JSON-RPC method names to handlers. Handlers take
//! the per-request [`Exchange`] and the raw params value, and return a
//! boxed future of the result value. Middleware are unary functions over
//! handlers; the table is built once with the configured stack applied to
//! every entry, first middleware outermost.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, JsonRpcError, Result};
use crate::exchange::Exchange;
use crate::protocol::{LogLevel, methods, notifications};

/// A boxed future returned by handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A dispatchable method handler
pub type Handler = Arc<dyn Fn(Exchange, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A unary function over handlers
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Methods that are served before the session is initialized. Everything
/// else is rejected by the initialization check until the client has sent
/// `notifications/initialized`. Client responses bypass the table entirely.
pub const INIT_EXEMPT_METHODS: &[&str] = &[
    methods::INITIALIZE,
    methods::PING,
    notifications::INITIALIZED,
];

/// Wrap a plain async fn into a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Exchange, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |exchange, params| Box::pin(f(exchange, params)))
}

/// Compose a middleware stack over a handler. The first middleware in the
/// stack is outermost: it wraps the composition of the rest.
pub fn compose(stack: &[Middleware], handler: Handler) -> Handler {
    stack
        .iter()
        .rev()
        .fold(handler, |inner, middleware| middleware(inner))
}

/// Middleware that logs handler failures at the given level and converts
/// non-protocol errors into `-32603` internal errors. Installed outermost
/// by default.
pub fn with_error(level: LogLevel) -> Middleware {
    Arc::new(move |inner: Handler| {
        let inner = inner.clone();
        Arc::new(move |exchange: Exchange, params: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            Box::pin(async move {
                match inner(exchange, params).await {
                    Ok(value) => Ok(value),
                    Err(Error::JsonRpc(err)) => Err(Error::JsonRpc(err)),
                    Err(other) => {
                        let message = other.to_string();
                        log_at(level, &message);
                        Err(Error::JsonRpc(JsonRpcError::internal_error(message)))
                    }
                }
            })
        })
    })
}

/// Middleware that runs the handler on the tokio executor, making
/// otherwise-sequential handlers concurrent. A panicking handler resolves
/// to an internal error instead of tearing down the read loop.
pub fn with_async() -> Middleware {
    Arc::new(move |inner: Handler| {
        let inner = inner.clone();
        Arc::new(move |exchange: Exchange, params: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            Box::pin(async move {
                match tokio::spawn(inner(exchange, params)).await {
                    Ok(result) => result,
                    Err(join_err) => Err(Error::JsonRpc(JsonRpcError::internal_error(
                        join_err.to_string(),
                    ))),
                }
            })
        })
    })
}

/// Middleware that rejects requests until the session has completed
/// initialization. Applied to every table entry except the exempt methods.
pub fn with_init_check() -> Middleware {
    Arc::new(move |inner: Handler| {
        let inner = inner.clone();
        Arc::new(move |exchange: Exchange, params: Value| -> BoxFuture<'static, Result<Value>> {
            let inner = inner.clone();
            Box::pin(async move {
                if !exchange.session().is_initialized() {
                    return Err(Error::JsonRpc(JsonRpcError::invalid_params(
                        "Session not initialized.",
                    )));
                }
                inner(exchange, params).await
            })
        })
    })
}

fn log_at(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(error = %message, "handler failed"),
        LogLevel::Info | LogLevel::Notice => tracing::info!(error = %message, "handler failed"),
        LogLevel::Warning => tracing::warn!(error = %message, "handler failed"),
        _ => tracing::error!(error = %message, "handler failed"),
    }
}

/// The built dispatch table
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler, wrapping it with the given stack.
    pub fn register(&mut self, method: &'static str, stack: &[Middleware], handler: Handler) {
        self.handlers.insert(method, compose(stack, handler));
    }

    pub fn get(&self, method: &str) -> Option<&Handler> {
        self.handlers.get(method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
