use super::{
    NodeState, error_response, json_response, ok_response, realtime_error_response,
    require_resource_id,
};
use planner::protocol::{PublishInfo, Response};
use planner_realtime::{ChannelKey, RealtimeError, ResourceKind};
use std::sync::Arc;

/// Maximum serialized size of a record body.
const MAX_BODY_BYTES: usize = 16 * 1024;

pub fn handle_publish(
    state: &Arc<NodeState>,
    kind: ResourceKind,
    resource_id: &str,
    record_id: Option<String>,
    body: serde_json::Value,
) -> Response {
    if let Err(resp) = require_resource_id(resource_id) {
        return resp;
    }

    let record_id = match record_id {
        Some(id) if id.trim().is_empty() => {
            return realtime_error_response(&RealtimeError::InvalidArgument(
                "record id must not be empty".to_string(),
            ));
        }
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };

    let size = serde_json::to_vec(&body).map(|b| b.len()).unwrap_or(0);
    if size > MAX_BODY_BYTES {
        return error_response(
            "body_too_large",
            &format!("record bodies are limited to {MAX_BODY_BYTES} bytes"),
        );
    }

    let key = ChannelKey::new(kind, resource_id);
    let (record, op) = state.backend.upsert(&key, record_id, body);
    tracing::debug!(key = %key, record_id = %record.id, op = ?op, "record published");
    json_response(&PublishInfo { record, op })
}

pub fn handle_retract(
    state: &Arc<NodeState>,
    kind: ResourceKind,
    resource_id: &str,
    record_id: &str,
) -> Response {
    if let Err(resp) = require_resource_id(resource_id) {
        return resp;
    }

    let key = ChannelKey::new(kind, resource_id);
    if state.backend.retract(&key, record_id) {
        tracing::debug!(key = %key, record_id, "record retracted");
        ok_response(None)
    } else {
        error_response("not_found", &format!("no record {record_id} in {key}"))
    }
}
