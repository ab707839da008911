//! Transport adapters over the session core
//!
//! - `stdio` - line-delimited JSON over stdin/stdout
//! - `http` - Streamable HTTP with SSE (requires the `http` feature)
//!
//! A transport owns the byte framing and calls
//! [`Session::ingest`](crate::session::Session::ingest) per message; the
//! write callback installed via
//! [`Session::connect`](crate::session::Session::connect) is the
//! serialization point, so envelopes are written atomically.

pub mod stdio;

#[cfg(feature = "http")]
pub mod http;

pub use stdio::StdioTransport;

#[cfg(feature = "http")]
pub use http::HttpTransport;
