use crate::handler::{NodeState, error_response, handle_request};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use planner::protocol::{MAX_LINE_BYTES, Request, Response};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Pushed events buffered per connection before new ones are dropped.
/// A client that falls this far behind should re-sync with a `snapshot`
/// request.
const OUTBOUND_QUEUE: usize = 256;

/// Start the Unix socket server. Accepts client connections and processes requests.
pub async fn serve(state: Arc<NodeState>, socket_path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).ok();
        }
    }

    // Remove stale socket
    if socket_path.exists() {
        std::fs::remove_file(socket_path).ok();
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600)).ok();
    }

    tracing::info!(path = %socket_path.display(), "Unix socket listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(state, stream).await {
                tracing::debug!(err = %e, "client disconnected");
            }
        });
    }
}

async fn handle_client(state: Arc<NodeState>, stream: tokio::net::UnixStream) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut conn = state.open_connection(out_tx);
    tracing::debug!(connection = conn.id, "client connected");

    let result = async {
        let (r, w) = stream.into_split();
        let mut reader = FramedRead::new(r, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let mut writer = FramedWrite::new(w, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        let hello = Response::Hello {
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        writer.send(serde_json::to_string(&hello)?).await?;

        loop {
            tokio::select! {
                line = reader.next() => {
                    let Some(line) = line else { break };
                    let line = line?;
                    let req: Request = match serde_json::from_str(&line) {
                        Ok(req) => req,
                        Err(e) => {
                            let resp = error_response("invalid_request", &e.to_string());
                            writer.send(serde_json::to_string(&resp)?).await?;
                            continue;
                        }
                    };

                    let is_shutdown = matches!(req, Request::Shutdown);
                    let resp = handle_request(&state, &mut conn, req).await;
                    writer.send(serde_json::to_string(&resp)?).await?;

                    if is_shutdown {
                        break;
                    }
                }
                resp = out_rx.recv() => {
                    // The connection holds a sender, so the queue never closes here.
                    let Some(resp) = resp else { break };
                    writer.send(serde_json::to_string(&resp)?).await?;
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    state.close_connection(&mut conn);
    result
}
