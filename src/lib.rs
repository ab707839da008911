//! # conduit-mcp
//!
//! Transport-neutral Model Context Protocol (MCP) server library.
//!
//! The crate is organized around a session core: a JSON-RPC 2.0 engine
//! that owns per-connection state and dispatches the MCP method surface
//! (initialize, tools, prompts, resources, completions, logging) plus the
//! server-to-client direction (roots, sampling, progress, cancellation).
//! Transports are thin adapters: they frame bytes, feed
//! [`Session::ingest`], and install a write callback.
//!
//! - Configure an [`McpServer`] blueprint with tools, prompts, resources,
//!   and completions
//! - Stamp a [`Session`] per connection; the state machine, in-flight
//!   tracking, and outbound correlation are per-session
//! - Serve it over stdio ([`StdioTransport`]) or HTTP+SSE
//!   (`transport::http::HttpTransport`, behind the `http` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_mcp::{McpServer, StdioTransport, ToolBuilder, ToolResponse};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct SumInput {
//!     a: i64,
//!     b: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sum = ToolBuilder::new("sum")
//!         .description("Add two numbers")
//!         .handler(|_exchange, input: SumInput| async move {
//!             Ok(ToolResponse::text(format!("{}", input.a + input.b)))
//!         });
//!
//!     let server = McpServer::new()
//!         .server_info("calculator", "1.0.0")
//!         .tool(sum);
//!
//!     StdioTransport::new(&server).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Handlers talk back to the client through their [`Exchange`]: progress
//! reporting, MCP log notifications, `roots/list`, and
//! `sampling/createMessage`. Client-initiated cancellation is delivered
//! via [`Exchange::cancellation`]; a response is never written for a
//! request the client has cancelled.

pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod outbound;
pub mod prompt;
pub mod protocol;
pub mod resource;
pub mod server;
pub mod session;
pub mod testing;
pub mod tool;
pub mod transport;
pub mod wire;

// Re-exports
pub use dispatch::{Middleware, with_async, with_error, with_init_check};
pub use error::{BoxError, Error, ErrorCode, JsonRpcError, McpErrorCode, Result};
pub use exchange::{CancelSignal, Exchange, Extensions};
pub use prompt::{Prompt, PromptBuilder, PromptResponse};
pub use protocol::{
    CompleteResult, Content, ContentAnnotations, CreateMessageParams, CreateMessageResult,
    LogLevel, ProgressUpdate, Root, SamplingMessage,
};
pub use resource::{
    InMemoryResources, ResourceBody, ResourceBuilder, ResourceEntry, ResourceProvider,
    ResourceTemplate, ResourceTemplateBuilder,
};
pub use server::{McpServer, ServerInfo};
pub use session::{PendingClientRequest, Session, SessionPhase};
pub use testing::TestClient;
pub use tool::{Tool, ToolBuilder, ToolResponse};
pub use transport::StdioTransport;

#[cfg(feature = "http")]
pub use transport::http::HttpTransport;
