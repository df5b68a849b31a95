//! The stdin/stdout line-delimited JSON loop (§6). One line in, one
//! line out, in order; pub-events from the context's event channel are
//! interleaved onto stdout from a separate task as they arrive.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::context::AppContext;
use crate::handlers::dispatch;
use crate::protocol::{Request, Response};
use crate::IpcError;

/// Runs until stdin closes. Spawns a task that drains the pub-event
/// channel onto stdout; the main task reads requests and writes
/// responses. Both write to stdout, so each side locks it per line
/// rather than holding it across an await.
pub async fn run_transport(
    ctx: Arc<AppContext>,
    events_rx: crossbeam_channel::Receiver<crate::protocol::PubEvent>,
) {
    let event_pump = tokio::task::spawn_blocking(move || {
        for event in events_rx.iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("failed to serialize pub event: {e}"),
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("stdin read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&ctx, &line);
        match serde_json::to_string(&response) {
            Ok(mut text) => {
                text.push('\n');
                if stdout.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            Err(e) => log::error!("failed to serialize response: {e}"),
        }
    }

    drop(ctx);
    let _ = event_pump.await;
}

fn handle_line(ctx: &AppContext, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Response::err("unknown", None, IpcError::Json(e)),
    };
    match dispatch(ctx, &request.command, &request.params) {
        Ok(fields) => Response::ok(request.command, request.message_id, fields),
        Err(e) => {
            log::warn!("command '{}' failed: {e}", request.command);
            Response::err(request.command, request.message_id, e)
        }
    }
}
