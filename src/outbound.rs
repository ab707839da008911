//! Outbound request correlation
//!
//! Server-originated requests (`roots/list`, `sampling/createMessage`) are
//! tracked here until the matching client response arrives. Each entry
//! holds a one-shot completion; entries leave the table on response,
//! cancellation, or the timeout sweep, so no id stays pending forever.
//!
//! The sweep is opportunistic: it runs on inbound traffic, at most once per
//! 500 ms, so no background task is required.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::{ProgressParams, ProgressToken};

/// Default timeout for outbound requests (2 minutes)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Minimum interval between timeout sweeps
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked for each progress notification bearing a registered
/// token. Receives the full notification params.
pub type ProgressCallback = std::sync::Arc<dyn Fn(ProgressParams) + Send + Sync>;

struct Outstanding {
    registered_at: Instant,
    completion: oneshot::Sender<Result<Value>>,
    progress_token: Option<String>,
}

/// Table of outstanding server-originated requests plus the progress-token
/// registry for their callbacks.
pub struct OutboundTable {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, Outstanding>>,
    progress: Mutex<HashMap<String, ProgressCallback>>,
    last_sweep: Mutex<Instant>,
    timeout: Duration,
}

impl OutboundTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            timeout,
        }
    }

    /// Register a new outbound request.
    ///
    /// Returns the allocated id, the progress token to embed in the
    /// request's `_meta` (when a callback was supplied), and the receiver
    /// that resolves with the client's response.
    pub fn register(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> (i64, Option<String>, oneshot::Receiver<Result<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let token = on_progress.map(|callback| {
            let token = uuid::Uuid::new_v4().to_string();
            self.progress
                .lock()
                .expect("progress registry poisoned")
                .insert(token.clone(), callback);
            token
        });

        self.pending.lock().expect("pending table poisoned").insert(
            id,
            Outstanding {
                registered_at: Instant::now(),
                completion: tx,
                progress_token: token.clone(),
            },
        );

        (id, token, rx)
    }

    /// Complete an outstanding request with the client's response.
    ///
    /// Returns false when the id is unknown (already completed, timed out,
    /// or cancelled); the response is dropped in that case.
    pub fn complete(&self, id: i64, result: Result<Value>) -> bool {
        let Some(entry) = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&id)
        else {
            return false;
        };
        self.deregister_progress(entry.progress_token.as_deref());
        // The waiter may have gone away; that is not an error.
        let _ = entry.completion.send(result);
        true
    }

    /// Remove an outstanding request without completing it. Used for local
    /// cancellation; the caller decides whether to notify the client.
    pub fn cancel(&self, id: i64) -> bool {
        let Some(entry) = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&id)
        else {
            return false;
        };
        self.deregister_progress(entry.progress_token.as_deref());
        true
    }

    /// Route an inbound progress notification to its registered callback.
    /// Unknown tokens are ignored.
    pub fn dispatch_progress(&self, params: &ProgressParams) {
        let ProgressToken::String(token) = &params.progress_token else {
            return;
        };
        let callback = {
            let registry = self.progress.lock().expect("progress registry poisoned");
            registry.get(token).cloned()
        };
        if let Some(callback) = callback {
            callback(params.clone());
        }
    }

    /// Expire entries older than the configured timeout.
    ///
    /// Throttled to at most one pass per 500 ms across concurrent callers;
    /// transports invoke this on every inbound message.
    pub fn sweep(&self) {
        {
            let mut last = self.last_sweep.lock().expect("sweep clock poisoned");
            if last.elapsed() < SWEEP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }

        let expired: Vec<(i64, Outstanding)> = {
            let mut pending = self.pending.lock().expect("pending table poisoned");
            let ids: Vec<i64> = pending
                .iter()
                .filter(|(_, e)| e.registered_at.elapsed() > self.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (id, entry) in expired {
            tracing::warn!(request_id = id, "outbound request timed out");
            self.deregister_progress(entry.progress_token.as_deref());
            let _ = entry.completion.send(Err(Error::Timeout { id }));
        }
    }

    /// Number of requests currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }

    fn deregister_progress(&self, token: Option<&str>) {
        if let Some(token) = token {
            self.progress
                .lock()
                .expect("progress registry poisoned")
                .remove(token);
        }
    }
}

impl std::fmt::Debug for OutboundTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundTable")
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        let (a, _, _rx_a) = table.register(None);
        let (b, _, _rx_b) = table.register(None);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_complete_resolves_receiver() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        let (id, token, rx) = table.register(None);
        assert!(token.is_none());

        assert!(table.complete(id, Ok(serde_json::json!({"ok": true}))));
        let value = rx.await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_response_dropped() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        let (id, _, _rx) = table.register(None);
        assert!(table.complete(id, Ok(Value::Null)));
        // Second response for the same id is unknown
        assert!(!table.complete(id, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_cancel_removes_silently() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        let (id, _, mut rx) = table.register(None);
        assert!(table.cancel(id));
        assert_eq!(table.pending_count(), 0);
        // Sender dropped without a value
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_registration_and_dispatch() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let (id, token, _rx) = table.register(Some(Arc::new(move |params| {
            assert_eq!(params.progress, 0.5);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })));
        let token = token.expect("token allocated for progress callback");

        let params = ProgressParams {
            progress_token: ProgressToken::String(token.clone()),
            progress: 0.5,
            total: Some(1.0),
            message: None,
        };
        table.dispatch_progress(&params);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // After completion the token is deregistered
        table.complete(id, Ok(Value::Null));
        table.dispatch_progress(&params);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_ignored() {
        let table = OutboundTable::new(DEFAULT_REQUEST_TIMEOUT);
        table.dispatch_progress(&ProgressParams {
            progress_token: ProgressToken::String("nope".into()),
            progress: 1.0,
            total: None,
            message: None,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_times_out_old_entries() {
        let table = OutboundTable::new(Duration::from_millis(50));
        let (id, _, rx) = table.register(None);

        // Advance past both the entry timeout and the sweep throttle
        tokio::time::advance(Duration::from_millis(600)).await;
        table.sweep();

        match rx.await.unwrap() {
            Err(Error::Timeout { id: timed_out }) => assert_eq!(timed_out, id),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_throttled() {
        let table = OutboundTable::new(Duration::from_millis(0));
        // First sweep within 500ms of table creation is a no-op, so a
        // zero-timeout entry survives it.
        let (_, _, mut rx) = table.register(None);
        table.sweep();
        assert!(rx.try_recv().is_err());
        assert_eq!(table.pending_count(), 1);
    }
}
