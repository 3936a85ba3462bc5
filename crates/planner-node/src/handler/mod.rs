pub mod realtime;
pub mod records;

use planner::protocol::{Request, Response, StatsInfo};
use planner_realtime::{
    ChannelKey, MemoryBackend, RealtimeError, RealtimeHub, Record, RegistryConfig,
    SubscriptionHandle,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What every subscriber of a resource receives: its full record list.
pub type Snapshot = Arc<Vec<Record>>;

/// Shared node state accessible by all client connections.
pub struct NodeState {
    /// Record store and upstream channel source.
    pub backend: MemoryBackend,
    /// One registry per resource kind, shared by every connection.
    pub hub: RealtimeHub<Snapshot>,
    /// Cancelled when a client asks the daemon to shut down.
    pub shutdown: CancellationToken,
    connections: AtomicUsize,
    next_connection: AtomicU64,
}

impl NodeState {
    pub fn new(backend: MemoryBackend, config: RegistryConfig) -> Arc<Self> {
        let hub = RealtimeHub::create(Arc::new(backend.clone()), config);
        Arc::new(Self {
            backend,
            hub,
            shutdown: CancellationToken::new(),
            connections: AtomicUsize::new(0),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Register a client connection whose pushed events go to `out_tx`.
    pub fn open_connection(&self, out_tx: mpsc::Sender<Response>) -> Connection {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Connection {
            id: self.next_connection.fetch_add(1, Ordering::SeqCst),
            out_tx,
            subscriptions: HashMap::new(),
        }
    }

    /// Release every subscription the connection still holds.
    pub fn close_connection(&self, conn: &mut Connection) {
        let released = conn.release_all();
        self.connections.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(connection = conn.id, released, "connection closed");
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Per-connection subscription bookkeeping.
pub struct Connection {
    pub id: u64,
    out_tx: mpsc::Sender<Response>,
    subscriptions: HashMap<ChannelKey, SubscriptionHandle>,
}

impl Connection {
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn release_all(&mut self) -> usize {
        let count = self.subscriptions.len();
        for (_, handle) in self.subscriptions.drain() {
            handle.unsubscribe();
        }
        count
    }
}

/// Handle a single request from a client.
pub async fn handle_request(
    state: &Arc<NodeState>,
    conn: &mut Connection,
    req: Request,
) -> Response {
    match req {
        // Realtime
        Request::Subscribe { kind, resource_id } => {
            realtime::handle_subscribe(state, conn, kind, &resource_id)
        }
        Request::Unsubscribe { kind, resource_id } => {
            realtime::handle_unsubscribe(conn, kind, &resource_id)
        }
        Request::Snapshot { kind, resource_id } => {
            realtime::handle_snapshot(state, kind, &resource_id)
        }

        // Records
        Request::Publish {
            kind,
            resource_id,
            record_id,
            body,
        } => records::handle_publish(state, kind, &resource_id, record_id, body),
        Request::Retract {
            kind,
            resource_id,
            record_id,
        } => records::handle_retract(state, kind, &resource_id, &record_id),

        Request::Stats => handle_stats(state),
        Request::Shutdown => handle_shutdown(state),
    }
}

fn handle_stats(state: &Arc<NodeState>) -> Response {
    json_response(&StatsInfo {
        kinds: state.hub.stats(),
        channels_opened: state.backend.opened(),
        channels_closed: state.backend.closed(),
        connections: state.connections(),
    })
}

fn handle_shutdown(state: &Arc<NodeState>) -> Response {
    tracing::info!("shutdown requested by client");
    state.shutdown.cancel();
    ok_response(None)
}

// ---- Shared helpers ----

/// Reject empty resource ids the same way the registry does.
pub fn require_resource_id(resource_id: &str) -> Result<(), Response> {
    if resource_id.trim().is_empty() {
        return Err(realtime_error_response(&RealtimeError::InvalidArgument(
            "resource id must not be empty".to_string(),
        )));
    }
    Ok(())
}

/// Try-send a response on the connection's outbound queue.
pub fn enqueue_response(out_tx: &mpsc::Sender<Response>, response: Response) -> anyhow::Result<()> {
    match out_tx.try_send(response) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            Err(anyhow::anyhow!("client outbound queue full"))
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(anyhow::anyhow!("connection closed")),
    }
}

pub fn ok_response(data: Option<serde_json::Value>) -> Response {
    Response::Ok { data }
}

/// Serialize `data` into an Ok response.
pub fn json_response<T: Serialize>(data: &T) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => ok_response(Some(value)),
        Err(e) => error_response("internal", &e.to_string()),
    }
}

pub fn error_response(code: &str, message: &str) -> Response {
    Response::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

pub fn realtime_error_response(err: &RealtimeError) -> Response {
    error_response(err.code(), &err.to_string())
}
