//! Test utilities for MCP servers.
//!
//! [`TestClient`] drives a [`Session`] over an in-memory transport so
//! server behavior can be asserted without manual JSON-RPC plumbing.
//! Requests are correlated by id; everything else the server emits
//! (notifications, server-originated requests) is buffered and available
//! through [`TestClient::take_notification`] and friends.
//!
//! # Quick Start
//!
//! ```rust
//! use conduit_mcp::{McpServer, TestClient, ToolBuilder, ToolResponse};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct EchoInput {
//!     message: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let echo = ToolBuilder::new("echo")
//!     .description("Echo a message")
//!     .handler(|_exchange, input: EchoInput| async move {
//!         Ok(ToolResponse::text(input.message))
//!     });
//!
//! let server = McpServer::new().server_info("test-server", "1.0.0").tool(echo);
//!
//! let mut client = TestClient::new(server);
//! client.initialize().await;
//!
//! let result = client.call_tool("echo", json!({"message": "hello"})).await;
//! assert_eq!(result["content"][0]["text"], "hello");
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::server::McpServer;
use crate::session::Session;

/// An ergonomic in-memory client for testing MCP servers.
///
/// Methods that expect success panic on error responses, which is the
/// right behavior for test code; use [`TestClient::request_expect_error`]
/// to assert failures.
pub struct TestClient {
    session: Session,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Non-response traffic received while waiting for a response
    pending: VecDeque<Value>,
    next_id: i64,
}

impl TestClient {
    /// Create a fresh session from the server blueprint and wire it to an
    /// in-memory transport.
    pub fn new(server: McpServer) -> Self {
        Self::from_session(server.session())
    }

    /// Wrap an existing session.
    pub fn from_session(session: Session) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        session.connect(Arc::new(move |text: String| {
            let _ = tx.send(text);
        }));
        Self {
            session,
            outbound_rx: rx,
            pending: VecDeque::new(),
            next_id: 1,
        }
    }

    /// The session under test
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Feed raw text to the session, as a transport would.
    pub async fn ingest(&mut self, text: &str) {
        self.session.ingest(text).await;
    }

    /// Drain everything the server has emitted so far, parsed as JSON.
    pub fn take_outbound(&mut self) -> Vec<Value> {
        let mut out: Vec<Value> = self.pending.drain(..).collect();
        while let Ok(text) = self.outbound_rx.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                out.push(value);
            }
        }
        out
    }

    /// Pop the next buffered non-response message (notification or
    /// server-originated request), if any.
    pub fn take_notification(&mut self) -> Option<Value> {
        if let Some(value) = self.pending.pop_front() {
            return Some(value);
        }
        while let Ok(text) = self.outbound_rx.try_recv() {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Some(value);
            }
        }
        None
    }

    /// Pop buffered messages until one with the given method appears.
    /// Panics when the buffer runs dry first.
    pub fn expect_notification(&mut self, method: &str) -> Value {
        while let Some(value) = self.take_notification() {
            if value.get("method").and_then(Value::as_str) == Some(method) {
                return value;
            }
        }
        panic!("expected notification {:?} was not emitted", method);
    }

    /// Send a request and return the full response envelope.
    pub async fn request_envelope(&mut self, method: &str, params: Option<Value>) -> Value {
        let id = self.next_id();
        let mut envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            envelope["params"] = params;
        }
        self.session.ingest(&envelope.to_string()).await;

        // The response is in the channel once ingest returns; anything
        // else that arrived first is buffered for later inspection.
        while let Ok(text) = self.outbound_rx.try_recv() {
            let value: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let is_response = value.get("method").is_none();
            if is_response && value.get("id") == Some(&json!(id)) {
                return value;
            }
            self.pending.push_back(value);
        }
        panic!("no response emitted for {} (id {})", method, id);
    }

    /// Send a request and return its result. Panics on an error response.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Value {
        let envelope = self.request_envelope(method, params).await;
        if let Some(error) = envelope.get("error") {
            panic!("request {} failed: {}", method, error);
        }
        envelope["result"].clone()
    }

    /// Send a request and return its error object. Panics on success.
    pub async fn request_expect_error(&mut self, method: &str, params: Option<Value>) -> Value {
        let envelope = self.request_envelope(method, params).await;
        match envelope.get("error") {
            Some(error) => error.clone(),
            None => panic!("request {} unexpectedly succeeded", method),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) {
        let mut envelope = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(params) = params {
            envelope["params"] = params;
        }
        self.session.ingest(&envelope.to_string()).await;
    }

    // -------------------------------------------------------------------------
    // Typed helpers
    // -------------------------------------------------------------------------

    /// Run the full initialize handshake and return the initialize result.
    pub async fn initialize(&mut self) -> Value {
        self.initialize_with_capabilities(json!({})).await
    }

    /// Initialize with explicit client capabilities.
    pub async fn initialize_with_capabilities(&mut self, capabilities: Value) -> Value {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": capabilities,
                    "clientInfo": { "name": "test-client", "version": "0.0.0" },
                })),
            )
            .await;
        self.notify("notifications/initialized", None).await;
        result
    }

    /// List tools, returning the `tools` array.
    pub async fn list_tools(&mut self) -> Vec<Value> {
        let result = self.request("tools/list", Some(json!({}))).await;
        result["tools"].as_array().cloned().unwrap_or_default()
    }

    /// Call a tool and return the call result object.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// List prompts, returning the `prompts` array.
    pub async fn list_prompts(&mut self) -> Vec<Value> {
        let result = self.request("prompts/list", Some(json!({}))).await;
        result["prompts"].as_array().cloned().unwrap_or_default()
    }

    /// Get a prompt by name.
    pub async fn get_prompt(&mut self, name: &str, arguments: Value) -> Value {
        self.request(
            "prompts/get",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// List resources, returning the `resources` array.
    pub async fn list_resources(&mut self) -> Vec<Value> {
        let result = self.request("resources/list", Some(json!({}))).await;
        result["resources"].as_array().cloned().unwrap_or_default()
    }

    /// Read a resource by URI.
    pub async fn read_resource(&mut self, uri: &str) -> Value {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("session", &self.session)
            .field("buffered", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolBuilder, ToolResponse};

    #[tokio::test]
    async fn test_client_initialize_and_ping() {
        let mut client = TestClient::new(McpServer::new().server_info("t", "0"));
        let init = client.initialize().await;
        assert_eq!(init["serverInfo"]["name"], "t");

        let pong = client.request("ping", None).await;
        assert_eq!(pong, json!({}));
    }

    #[tokio::test]
    async fn test_client_error_helper() {
        let mut client = TestClient::new(McpServer::new());
        client.initialize().await;
        let error = client.request_expect_error("no/such", None).await;
        assert_eq!(error["code"], -32601);
    }

    #[tokio::test]
    async fn test_client_buffers_notifications() {
        let mut client = TestClient::new(McpServer::new());
        client.initialize().await;

        client.session().add_tool(
            ToolBuilder::new("late").raw_handler(|_ex, _a| async { Ok(ToolResponse::text("x")) }),
        );
        // A request after the mutation still correlates correctly
        let pong = client.request("ping", None).await;
        assert_eq!(pong, json!({}));

        let notif = client.expect_notification("notifications/tools/list_changed");
        assert_eq!(notif["method"], "notifications/tools/list_changed");
    }
}
