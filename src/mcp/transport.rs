//! stdio transport for the MCP engine.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! A stdio connection carries exactly one client, so everything runs under
//! the no-session id (`None`).
//!
//! # Concurrency
//!
//! Each inbound line is handed to [`McpServer::receive`] on its own task, so a
//! tool that is waiting on the client (sampling, elicitation, roots) does not
//! stop the client's answer from being read. All output, responses and
//! engine-initiated messages alike, goes through one writer task.

use std::future::Future;
use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::mcp::events::{EventKind, ServerEvent};
use crate::mcp::protocol::JsonRpcError;
use crate::mcp::server::McpServer;
use crate::mcp::session::SessionId;

/// Session id used for the single stdio client.
const STDIO_SESSION: SessionId = None;

/// A newline-delimited JSON-RPC transport.
///
/// Defaults to the process's stdin and stdout; [`StdioTransport::with_io`]
/// accepts any buffered reader and writer.
pub struct StdioTransport<R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout> {
    /// Buffered reader for inbound lines.
    reader: R,
    /// Sink for outbound lines.
    writer: W,
}

impl StdioTransport {
    /// Creates a transport over stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over the given reader and writer.
    pub const fn with_io(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` once the input is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        read_next(&mut self.reader).await
    }

    /// Runs the transport until the input closes or `shutdown` resolves.
    ///
    /// On exit the stdio session is closed, which fails any request the
    /// engine is still waiting on, and every queued message is flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn serve<S>(self, server: McpServer, shutdown: S) -> io::Result<()>
    where
        S: Future<Output = ()>,
    {
        let Self { mut reader, writer } = self;
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let writer = tokio::spawn(write_loop(writer, rx));

        let outbound = tx.clone();
        let listener = server.on(EventKind::Send, move |event| {
            if let ServerEvent::Send { message, target } = event {
                if target.includes(&STDIO_SESSION) {
                    // A closed channel means the transport is shutting down.
                    let _ = outbound.send(message.clone());
                }
            }
        });

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        let read_result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, closing transport");
                    break Ok(());
                }

                line = read_next(&mut reader) => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            tracing::info!("Input closed, shutting down");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let message = match serde_json::from_str::<Value>(&line) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::debug!(error = %e, "Unparseable input line");
                            if let Ok(error) = serde_json::to_value(JsonRpcError::parse_error()) {
                                let _ = tx.send(error);
                            }
                            continue;
                        }
                    };

                    let server = server.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = server.receive(message, None).await {
                            let _ = tx.send(response);
                        }
                    });
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Request task failed");
                    }
                }
            }
        };

        if let Err(e) = server.close_session(&STDIO_SESSION).await {
            tracing::warn!(error = %e, "Failed to release stdio session");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Request task failed");
            }
        }

        listener.unsubscribe();
        drop(tx);
        let write_result = writer.await.map_err(io::Error::other)?;

        read_result.and(write_result)
    }
}

/// Reads one line without its terminator; `None` at EOF.
async fn read_next<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Writes queued messages, one per line, until every sender is gone.
async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) -> io::Result<()> {
    while let Some(message) = rx.recv().await {
        let mut line =
            serde_json::to_string(&message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // stdio framing: messages must not contain embedded newlines
        debug_assert!(!line.contains('\n'), "JSON message must not contain embedded newlines");

        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, RequestId};
    use crate::mcp::server::ServerOptions;
    use crate::mcp::types::ServerInfo;
    use std::future::pending;

    fn test_server() -> McpServer {
        McpServer::new(ServerInfo::new("test", "0.0.1"), ServerOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn answers_ping_then_stops_at_eof() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"id\":1,\"jsonrpc\":\"2.0\",\"result\":{}}\n")
            .build();

        StdioTransport::with_io(BufReader::new(reader), writer)
            .serve(test_server(), pending())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn garbage_gets_a_parse_error() {
        let reader = tokio_test::io::Builder::new().read(b"not json\n\n").build();
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"error\":{\"code\":-32700,\"message\":\"Parse error\"},\"id\":null,\"jsonrpc\":\"2.0\"}\n")
            .build();

        StdioTransport::with_io(BufReader::new(reader), writer)
            .serve(test_server(), pending())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn read_line_strips_line_endings() {
        let reader = tokio_test::io::Builder::new().read(b"first\r\nsecond\n").build();
        let mut transport = StdioTransport::with_io(BufReader::new(reader), tokio::io::sink());

        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(transport.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(transport.read_line().await.unwrap(), None);
    }

    #[test]
    fn serialise_response_no_newlines() {
        let response = JsonRpcResponse::success(
            RequestId::Number(1),
            serde_json::json!({
                "message": "hello world",
                "nested": {"key": "value"}
            }),
        );

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains('\n'), "Serialised JSON should not contain newlines");
    }
}
