use serde::{Deserialize, Serialize};

pub use planner_realtime::{ChangeOp, KindStats, Record, ResourceKind};

/// Maximum size of a JSON-lines frame on the Unix socket (64 KiB).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request sent from a UI process to the node daemon over the Unix socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // -- Realtime --
    /// Start receiving snapshots of a resource on this connection.
    Subscribe {
        kind: ResourceKind,
        resource_id: String,
    },
    /// Stop receiving snapshots of a resource.
    Unsubscribe {
        kind: ResourceKind,
        resource_id: String,
    },
    /// Current records of a resource (cached data if a channel is open).
    Snapshot {
        kind: ResourceKind,
        resource_id: String,
    },

    // -- Writes --
    /// Insert or replace a record. A record id is generated when omitted.
    Publish {
        kind: ResourceKind,
        resource_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record_id: Option<String>,
        body: serde_json::Value,
    },
    /// Remove a record.
    Retract {
        kind: ResourceKind,
        resource_id: String,
        record_id: String,
    },

    // -- Daemon --
    /// Channel and subscriber counters.
    Stats,
    /// Shut down the daemon.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A response sent from the node daemon to a UI process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Connection established.
    Hello { version: String },
    /// Request succeeded with optional data.
    Ok { data: Option<serde_json::Value> },
    /// Request failed.
    Error { code: String, message: String },
    /// Asynchronous event pushed for a subscription.
    Event { event: Event },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Asynchronous events pushed to subscribed connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Fresh full state of a resource.
    Snapshot {
        kind: ResourceKind,
        resource_id: String,
        records: Vec<Record>,
    },
    /// A refresh failed; only sent when the daemon propagates refresh errors.
    RefreshFailed {
        kind: ResourceKind,
        resource_id: String,
        message: String,
    },
}

impl Event {
    pub fn resource_id(&self) -> &str {
        match self {
            Event::Snapshot { resource_id, .. } | Event::RefreshFailed { resource_id, .. } => {
                resource_id
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Data types returned in Ok.data
// ---------------------------------------------------------------------------

/// Result of a `Publish` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishInfo {
    pub record: Record,
    pub op: ChangeOp,
}

/// Result of a `Snapshot` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub records: Vec<Record>,
    /// Whether the records came from an open channel's cache.
    pub cached: bool,
}

/// Result of a `Stats` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsInfo {
    pub kinds: Vec<KindStats>,
    pub channels_opened: usize,
    pub channels_closed: usize,
    pub connections: usize,
}

impl StatsInfo {
    pub fn open_channels(&self) -> usize {
        self.kinds.iter().map(|k| k.open_channels).sum()
    }

    pub fn subscribers(&self) -> usize {
        self.kinds.iter().map(|k| k.subscribers).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request::Subscribe {
            kind: ResourceKind::Messages,
            resource_id: "conv-1".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscribe", "kind": "messages", "resource_id": "conv-1"})
        );
    }

    #[test]
    fn publish_record_id_is_optional() {
        let req: Request = serde_json::from_value(json!({
            "type": "publish",
            "kind": "comments",
            "resource_id": "task-1",
            "body": {"text": "looks good"}
        }))
        .unwrap();
        match req {
            Request::Publish { record_id, body, .. } => {
                assert!(record_id.is_none());
                assert_eq!(body["text"], "looks good");
            }
            other => panic!("expected Publish, got {other:?}"),
        }

        let json = serde_json::to_string(&Request::Publish {
            kind: ResourceKind::Comments,
            resource_id: "task-1".to_string(),
            record_id: None,
            body: json!(1),
        })
        .unwrap();
        assert!(!json.contains("record_id"));
    }

    #[test]
    fn event_inside_response() {
        let resp = Response::Event {
            event: Event::Snapshot {
                kind: ResourceKind::SharedTasks,
                resource_id: "task-9".to_string(),
                records: vec![],
            },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["event"], "snapshot");
        assert_eq!(value["event"]["kind"], "shared_tasks");

        let decoded: Response = serde_json::from_value(value).unwrap();
        match decoded {
            Response::Event { event } => assert_eq!(event.resource_id(), "task-9"),
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let res: Result<Request, _> = serde_json::from_value(json!({
            "type": "subscribe",
            "kind": "badges",
            "resource_id": "x"
        }));
        assert!(res.is_err());
    }
}
