//! stdio transport
//!
//! One JSON envelope per line on stdin, one reply per line on stdout.
//! Logging goes to stderr; stdout carries nothing but envelopes.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::types::{ToolRequest, ToolResponse};
use crate::state::AppState;
use crate::tools;

/// Line-delimited stdio transport for the tool surface
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Serve until stdin closes.
    pub async fn run(self, state: AppState) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            debug!("stdio request: {} bytes", line.len());

            let response = match serde_json::from_str::<ToolRequest>(&line) {
                Ok(request) => {
                    let id = request.id.clone();
                    match tools::dispatch(&state, &request.op, request.args).await {
                        Ok(result) => ToolResponse::success(id, result),
                        Err(e) => ToolResponse::failure(id, e.to_string()),
                    }
                }
                Err(e) => {
                    warn!("unparseable envelope: {e}");
                    ToolResponse::failure(None, format!("parse error: {e}"))
                }
            };

            let serialized = serde_json::to_string(&response).unwrap_or_else(|e| {
                warn!("response serialization failed: {e}");
                r#"{"ok":false,"error":"internal serialization failure"}"#.to_string()
            });
            stdout.write_all(serialized.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
