use crate::SOCKET_FILE;
use crate::protocol::{Event, MAX_LINE_BYTES, PublishInfo, Request, Response};
use anyhow::{Context, Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use planner_realtime::optimistic::temp_id;
use planner_realtime::{OptimisticWrites, Record, ResourceKind};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Client for the planner node daemon's Unix socket API.
pub struct NodeClient {
    reader: FramedRead<tokio::net::unix::OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<tokio::net::unix::OwnedWriteHalf, LinesCodec>,
    version: String,
    /// Events that arrived while waiting for a request's reply.
    events: VecDeque<Event>,
}

impl NodeClient {
    /// Connect to the node daemon at the given socket path.
    /// Waits for the Hello response before returning.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("failed to connect to {}", socket_path.display()))?;
        let (r, w) = stream.into_split();
        let reader = FramedRead::new(r, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let writer = FramedWrite::new(w, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        let mut client = Self {
            reader,
            writer,
            version: String::new(),
            events: VecDeque::new(),
        };

        match client.next_response().await? {
            Response::Hello { version } => {
                client.version = version;
                Ok(client)
            }
            other => Err(anyhow!("expected Hello, got {other:?}")),
        }
    }

    /// Daemon version received in the Hello handshake.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Send a request to the daemon.
    pub async fn send(&mut self, req: Request) -> Result<()> {
        let line = serde_json::to_string(&req)?;
        self.writer.send(line).await?;
        Ok(())
    }

    /// Read the next line from the daemon, whatever it is.
    pub async fn next_response(&mut self) -> Result<Response> {
        let Some(line) = self.reader.next().await else {
            bail!("daemon disconnected");
        };
        Ok(serde_json::from_str(&line?)?)
    }

    /// Send a request and return the raw Ok/Error reply. Events that arrive
    /// in between are kept for [`next_event`](Self::next_event).
    pub async fn call(&mut self, req: Request) -> Result<Response> {
        self.send(req).await?;
        loop {
            match self.next_response().await? {
                Response::Hello { .. } => continue,
                Response::Event { event } => self.events.push_back(event),
                resp => return Ok(resp),
            }
        }
    }

    /// Send a request and wait for the Ok/Error response.
    pub async fn request(&mut self, req: Request) -> Result<Option<serde_json::Value>> {
        match self.call(req).await? {
            Response::Ok { data } => Ok(data),
            Response::Error { message, .. } => bail!("{message}"),
            other => Err(anyhow!("unexpected response {other:?}")),
        }
    }

    /// Next pushed event, buffered ones first.
    pub async fn next_event(&mut self) -> Result<Event> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        loop {
            match self.next_response().await? {
                Response::Event { event } => return Ok(event),
                other => tracing::debug!(response = ?other, "dropping unsolicited response"),
            }
        }
    }

    /// Publish a record, showing it through `writes` before the daemon
    /// answers. The local copy carries a temporary id; it is confirmed on
    /// success and rolled back on failure.
    pub async fn publish_optimistic(
        &mut self,
        writes: &OptimisticWrites<Record>,
        kind: ResourceKind,
        resource_id: &str,
        body: serde_json::Value,
    ) -> Result<Record> {
        let local = Record {
            id: temp_id(),
            body: body.clone(),
            updated_at_ms: planner_realtime::now_ms(),
        };
        writes.apply_optimistic(resource_id, &local);

        let reply = self
            .call(Request::Publish {
                kind,
                resource_id: resource_id.to_string(),
                record_id: None,
                body,
            })
            .await;

        match reply {
            Ok(Response::Ok { data: Some(data) }) => {
                writes.confirm(resource_id, &local.id);
                let info: PublishInfo = serde_json::from_value(data)?;
                Ok(info.record)
            }
            Ok(Response::Error { code, message }) => {
                writes.apply_optimistic_error(resource_id, &local, format!("{code}: {message}"));
                bail!("{message}")
            }
            Ok(other) => {
                writes.apply_optimistic_error(resource_id, &local, "unexpected response");
                Err(anyhow!("unexpected response {other:?}"))
            }
            Err(e) => {
                writes.apply_optimistic_error(resource_id, &local, &e);
                Err(e)
            }
        }
    }
}

/// Discover the default socket path.
///
/// Checks `$PLANNER_SOCKET` env, then falls back to
/// `$XDG_RUNTIME_DIR/planner/planner.sock` or `/tmp/planner-$UID/planner.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(p) = std::env::var("PLANNER_SOCKET") {
        return PathBuf::from(p);
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("planner").join(SOCKET_FILE);
    }
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/planner-{uid}")).join(SOCKET_FILE)
}
