//! Stdio serve loop
//!
//! Line-delimited JSON over stdin/stdout. Requests are handled on their own
//! tasks so a long-running `execute` never blocks a `connections` call;
//! responses funnel through one writer task so output lines stay atomic.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{Request, Response};
use crate::tools::ToolHandler;

/// Serve until stdin closes.
pub async fn serve(tools: Arc<ToolHandler>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    // Writer task — ensures atomic line writes
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid request line: {}", e);
                continue;
            }
        };

        debug!("Request {}: {}", request.id, request.method);

        let tools = Arc::clone(&tools);
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = match tools.dispatch(&request.method, request.params).await {
                Ok(result) => Response::ok(request.id, result),
                Err(error) => Response::err(request.id, error),
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    let _ = out_tx.send(json).await;
                }
                Err(e) => warn!("Failed to serialize response {}: {}", request.id, e),
            }
        });
    }

    debug!("stdin closed, stopping serve loop");

    // Let in-flight responses drain before the writer stops
    drop(out_tx);
    let _ = writer.await;
}
