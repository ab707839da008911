//! Request exchange: the handler-facing capability object
//!
//! An [`Exchange`] is scoped to one inbound request and is the only path a
//! handler has back to the client: server-to-client requests (roots,
//! sampling), progress reporting, MCP log notifications, and the
//! cancellation signal for the request being served.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;
use crate::outbound::ProgressCallback;
use crate::protocol::{
    CreateMessageParams, CreateMessageResult, ListRootsResult, LogLevel, LoggingMessageParams,
    ProgressToken, ProgressUpdate, RequestId, RequestMeta, Root, methods, notifications,
};
use crate::session::Session;

// =============================================================================
// Extensions
// =============================================================================

/// Type-safe map of user-provided state, carried verbatim on the session
/// and readable from any handler.
#[derive(Default, Clone)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get a reference to a value by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// One-shot cancellation signal for an in-flight inbound request.
///
/// Completed by `notifications/cancelled` with the client-supplied reason.
/// The dispatcher consults the signal just before emission and suppresses
/// the response once it has fired.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. The first reason wins; later calls are ignored.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The reason supplied at cancellation, if the signal has fired.
    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Wait for cancellation and return the reason. Pends forever if the
    /// request completes without being cancelled.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender gone without firing: stay pending so select! arms
                // built on this future simply never win.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Exchange
// =============================================================================

/// Per-request capability object handed to every handler.
#[derive(Clone)]
pub struct Exchange {
    session: Session,
    request_id: Option<RequestId>,
    meta: Option<RequestMeta>,
    cancel: CancelSignal,
}

impl Exchange {
    pub(crate) fn new(
        session: Session,
        request_id: Option<RequestId>,
        meta: Option<RequestMeta>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            session,
            request_id,
            meta,
            cancel,
        }
    }

    /// The session this request belongs to
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The inbound request id; absent for notifications
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// The progress token the client attached to this request, if any
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.meta.as_ref().and_then(|m| m.progress_token.as_ref())
    }

    /// User state installed on the server builder
    pub fn state<T: Send + Sync + Clone + 'static>(&self) -> Option<T> {
        self.session.state::<T>()
    }

    /// Cancellation signal for the request being served. Handlers may
    /// await [`CancelSignal::cancelled`] or poll
    /// [`CancelSignal::is_cancelled`] at checkpoints.
    pub fn cancellation(&self) -> &CancelSignal {
        &self.cancel
    }

    /// True once the client has cancelled this request
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Progress
    // -------------------------------------------------------------------------

    /// Report progress for this request.
    ///
    /// Returns true iff the request carried a `_meta.progressToken`; without
    /// one there is nowhere to route the update and nothing is emitted.
    pub fn report_progress(&self, update: ProgressUpdate) -> bool {
        let Some(token) = self.progress_token() else {
            return false;
        };
        let params = crate::protocol::ProgressParams {
            progress_token: token.clone(),
            progress: update.progress,
            total: update.total,
            message: update.message,
        };
        self.session.send_notification(
            notifications::PROGRESS,
            serde_json::to_value(params).unwrap_or_default(),
        );
        true
    }

    // -------------------------------------------------------------------------
    // Logging
    // -------------------------------------------------------------------------

    /// Log a message locally and, when the client has configured a logging
    /// level via `logging/setLevel`, forward it as `notifications/message`.
    pub fn log_message(
        &self,
        level: LogLevel,
        logger: Option<&str>,
        message: &str,
        data: Option<Value>,
    ) {
        match level {
            LogLevel::Debug => tracing::debug!(?logger, "{}", message),
            LogLevel::Info | LogLevel::Notice => tracing::info!(?logger, "{}", message),
            LogLevel::Warning => tracing::warn!(?logger, "{}", message),
            _ => tracing::error!(?logger, "{}", message),
        }

        if self.session.logging_level().is_none() {
            return;
        }

        let params = LoggingMessageParams {
            level,
            logger: logger.map(|s| s.to_string()),
            data: Some(serde_json::json!({
                "error": message,
                "details": data,
            })),
        };
        self.session.send_notification(
            notifications::MESSAGE,
            serde_json::to_value(params).unwrap_or_default(),
        );
    }

    // -------------------------------------------------------------------------
    // Server-to-client requests
    // -------------------------------------------------------------------------

    /// Send a raw request to the client and await the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Value> {
        self.session
            .send_client_request(method, params, on_progress)?
            .await_response()
            .await
    }

    /// Send a notification to the client.
    pub fn send_notification(&self, method: &str, params: Value) {
        self.session.send_notification(method, params);
    }

    /// List the client's roots.
    ///
    /// Returns an empty list immediately when the client did not advertise
    /// the `roots` capability. When the client supports change
    /// notifications, the first result is memoized until
    /// `notifications/roots/list_changed` invalidates it; otherwise every
    /// call issues a fresh `roots/list` request.
    pub async fn list_roots(&self) -> Result<Vec<Root>> {
        self.list_roots_with_progress(None).await
    }

    /// [`Self::list_roots`] with a progress callback for the outbound
    /// request.
    pub async fn list_roots_with_progress(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<Root>> {
        let Some(roots_cap) = self
            .session
            .client_capabilities()
            .and_then(|caps| caps.roots)
        else {
            return Ok(Vec::new());
        };

        if !roots_cap.list_changed {
            return self.fetch_roots(on_progress).await;
        }

        // Single-flight: the cache mutex is held across the fetch, so
        // concurrent callers wait for the first producer.
        let cache = self.session.roots_cache();
        let mut guard = cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }
        let roots = self.fetch_roots(on_progress).await?;
        *guard = Some(roots.clone());
        Ok(roots)
    }

    async fn fetch_roots(&self, on_progress: Option<ProgressCallback>) -> Result<Vec<Root>> {
        let value = self
            .send_request(methods::ROOTS_LIST, serde_json::json!({}), on_progress)
            .await?;
        let result: ListRootsResult = serde_json::from_value(value)?;
        Ok(result.roots)
    }

    /// Request an LLM completion from the client.
    ///
    /// Returns `Ok(None)` when the client did not advertise the `sampling`
    /// capability.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<Option<CreateMessageResult>> {
        self.create_message_with_progress(params, None).await
    }

    /// [`Self::create_message`] with a progress callback for the outbound
    /// request.
    pub async fn create_message_with_progress(
        &self,
        params: CreateMessageParams,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Option<CreateMessageResult>> {
        let has_sampling = self
            .session
            .client_capabilities()
            .map(|caps| caps.sampling.is_some())
            .unwrap_or(false);
        if !has_sampling {
            return Ok(None);
        }

        let value = self
            .send_request(
                methods::SAMPLING_CREATE_MESSAGE,
                serde_json::to_value(&params)?,
                on_progress,
            )
            .await?;
        let result: CreateMessageResult = serde_json::from_value(value)?;
        Ok(Some(result))
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_insert_get() {
        #[derive(Clone, PartialEq, Debug)]
        struct AppState {
            name: String,
        }

        let mut ext = Extensions::new();
        ext.insert(AppState {
            name: "db".to_string(),
        });
        ext.insert(42u32);

        assert_eq!(ext.get::<AppState>().unwrap().name, "db");
        assert_eq!(ext.get::<u32>(), Some(&42));
        assert_eq!(ext.get::<String>(), None);
    }

    #[test]
    fn test_extensions_overwrite() {
        let mut ext = Extensions::new();
        ext.insert(1u32);
        ext.insert(2u32);
        assert_eq!(ext.get::<u32>(), Some(&2));
    }

    #[test]
    fn test_cancel_signal_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel("stop"));
        assert!(!signal.cancel("too late"));
        assert_eq!(signal.reason().as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_cancel_signal_wakes_waiter() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        // Give the waiter a chance to subscribe first
        tokio::task::yield_now().await;
        signal.cancel("shutdown");

        assert_eq!(handle.await.unwrap(), "shutdown");
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_fired() {
        let signal = CancelSignal::new();
        signal.cancel("gone");
        assert_eq!(signal.cancelled().await, "gone");
    }
}
