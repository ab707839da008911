//! Stdio transport for MCP
//!
//! Reads line-delimited JSON-RPC from stdin and writes responses to
//! stdout, one envelope (or batch array) per line. EOF on stdin stops the
//! loop and clears the session's output sink.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::server::McpServer;
use crate::session::Session;

/// Stdio transport for MCP servers
///
/// # Example
///
/// ```rust,no_run
/// use conduit_mcp::{McpServer, StdioTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = McpServer::new().server_info("my-server", "1.0.0");
///     StdioTransport::new(&server).run().await?;
///     Ok(())
/// }
/// ```
pub struct StdioTransport {
    session: Session,
}

impl StdioTransport {
    /// Create a transport with a fresh session from the blueprint
    pub fn new(server: &McpServer) -> Self {
        Self {
            session: server.session(),
        }
    }

    /// Wrap an existing session
    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session, e.g. for registering tools at runtime
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process messages until EOF.
    ///
    /// Outbound envelopes funnel through a single writer task, so each
    /// line is written atomically even when handlers emit concurrently.
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.session.connect(Arc::new(move |text: String| {
            let _ = tx.send(text);
        }));

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = rx.recv().await {
                if stdout.write_all(line.as_bytes()).await.is_err()
                    || stdout.write_all(b"\n").await.is_err()
                    || stdout.flush().await.is_err()
                {
                    tracing::error!("stdout write failed, stopping writer");
                    break;
                }
            }
        });

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();

        tracing::info!("stdio transport started, waiting for input");

        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(format!("Failed to read from stdin: {}", e)))?;

            if bytes_read == 0 {
                tracing::info!("stdin closed, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            tracing::debug!(input = %trimmed, "received message");
            self.session.ingest(trimmed).await;
        }

        // EOF: clear the output slot; the writer drains and exits once
        // the sender is dropped.
        self.session.disconnect();
        writer
            .await
            .map_err(|e| Error::Transport(format!("Writer task failed: {}", e)))?;
        Ok(())
    }
}
