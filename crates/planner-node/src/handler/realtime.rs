use super::{
    Connection, NodeState, Snapshot, enqueue_response, error_response, json_response,
    ok_response, realtime_error_response, require_resource_id,
};
use planner::protocol::{Event, Response, SnapshotInfo};
use planner_realtime::{
    ChannelKey, DataCallback, ErrorCallback, RealtimeError, ResourceKind, refresh_fn,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn handle_subscribe(
    state: &Arc<NodeState>,
    conn: &mut Connection,
    kind: ResourceKind,
    resource_id: &str,
) -> Response {
    let key = ChannelKey::new(kind, resource_id);
    if conn.subscriptions.contains_key(&key) {
        return error_response("already_subscribed", &format!("already subscribed to {key}"));
    }

    // The registry re-fetches on every change event; the backend is the
    // source of truth.
    let refresh = {
        let backend = state.backend.clone();
        let key = key.clone();
        refresh_fn(move || {
            let records = backend.fetch(&key);
            async move { Ok(Arc::new(records)) }
        })
    };

    let on_data: DataCallback<Snapshot> = {
        let out_tx = conn.out_tx.clone();
        let resource_id = resource_id.to_string();
        let conn_id = conn.id;
        Arc::new(move |records: &Snapshot| {
            let event = Event::Snapshot {
                kind,
                resource_id: resource_id.clone(),
                records: records.as_ref().clone(),
            };
            push_event(&out_tx, conn_id, event);
        })
    };

    let on_error: ErrorCallback = {
        let out_tx = conn.out_tx.clone();
        let resource_id = resource_id.to_string();
        let conn_id = conn.id;
        Arc::new(move |err: &RealtimeError| {
            let event = Event::RefreshFailed {
                kind,
                resource_id: resource_id.clone(),
                message: err.to_string(),
            };
            push_event(&out_tx, conn_id, event);
        })
    };

    match state
        .hub
        .subscribe_with_errors(kind, resource_id, refresh, on_data, on_error)
    {
        Ok(handle) => {
            conn.subscriptions.insert(key, handle);
            ok_response(None)
        }
        Err(e) => realtime_error_response(&e),
    }
}

pub fn handle_unsubscribe(
    conn: &mut Connection,
    kind: ResourceKind,
    resource_id: &str,
) -> Response {
    let key = ChannelKey::new(kind, resource_id);
    match conn.subscriptions.remove(&key) {
        Some(handle) => {
            handle.unsubscribe();
            ok_response(None)
        }
        None => error_response("not_subscribed", &format!("not subscribed to {key}")),
    }
}

pub fn handle_snapshot(state: &Arc<NodeState>, kind: ResourceKind, resource_id: &str) -> Response {
    if let Err(resp) = require_resource_id(resource_id) {
        return resp;
    }

    let info = match state.hub.registry(kind).last_data(resource_id) {
        Some(records) => SnapshotInfo {
            records: records.as_ref().clone(),
            cached: true,
        },
        None => SnapshotInfo {
            records: state.backend.fetch(&ChannelKey::new(kind, resource_id)),
            cached: false,
        },
    };
    json_response(&info)
}

fn push_event(out_tx: &mpsc::Sender<Response>, conn_id: u64, event: Event) {
    if let Err(e) = enqueue_response(out_tx, Response::Event { event }) {
        tracing::debug!(connection = conn_id, err = %e, "dropping pushed event");
    }
}
