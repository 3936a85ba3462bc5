use planner::protocol::Event;
use planner_realtime::{ChangeOp, ChannelKey, OptimisticWrites, RealtimeError, Record, ResourceKind};
use planner_tests::harness::{
    client::TestClient, expect_event, init_tracing, node::TestNode, unwrap_error_code,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

/// Local list a UI would render: applied records plus rollback reasons.
#[derive(Default)]
struct LocalView {
    shown: Mutex<Vec<String>>,
    rolled_back: Mutex<Vec<String>>,
}

fn track(writes: &OptimisticWrites<Record>, resource_id: &str) -> Arc<LocalView> {
    let view = Arc::new(LocalView::default());
    let on_apply = {
        let view = view.clone();
        Arc::new(move |r: &Record| view.shown.lock().unwrap().push(r.id.clone()))
    };
    let on_rollback = {
        let view = view.clone();
        Arc::new(move |r: &Record, err: &RealtimeError| {
            view.shown.lock().unwrap().retain(|id| id != &r.id);
            view.rolled_back.lock().unwrap().push(err.code().to_string());
        })
    };
    writes.register_handlers(resource_id, on_apply, on_rollback);
    view
}

#[tokio::test]
async fn optimistic_publish_confirms_on_success() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();
    client.subscribe(ResourceKind::Comments, "task-1").await.unwrap();

    let writes = OptimisticWrites::new();
    let view = track(&writes, "task-1");

    let record = client
        .publish_optimistic(&writes, ResourceKind::Comments, "task-1", json!({"text": "lgtm"}))
        .await
        .unwrap();

    assert!(!record.id.starts_with("temp-"));
    assert_eq!(writes.pending_count("task-1"), 0);
    let shown = view.shown.lock().unwrap().clone();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].starts_with("temp-"));
    assert!(view.rolled_back.lock().unwrap().is_empty());

    match expect_event(&mut client, WAIT).await {
        Event::Snapshot { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, record.id);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn optimistic_publish_rolls_back_once_on_failure() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();

    let writes = OptimisticWrites::new();
    let view = track(&writes, " ");

    let err = client
        .publish_optimistic(&writes, ResourceKind::Comments, " ", json!("doomed"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("resource id"));

    assert!(view.shown.lock().unwrap().is_empty());
    assert_eq!(
        view.rolled_back.lock().unwrap().as_slice(),
        ["optimistic_write_failed"]
    );
    assert_eq!(writes.pending_count(" "), 0);
}

#[tokio::test]
async fn oversized_publish_is_rejected() {
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();

    let resp = client
        .try_publish(ResourceKind::Messages, "conv-1", json!("x".repeat(20 * 1024)))
        .await
        .unwrap();
    assert_eq!(unwrap_error_code(resp), "body_too_large");
    let key = ChannelKey::new(ResourceKind::Messages, "conv-1");
    assert!(node.backend().fetch(&key).is_empty());
}

#[tokio::test]
async fn update_and_retract_reach_subscribers() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();
    let mut author = TestClient::connect(&node.socket_path).await.unwrap();
    let mut reader = TestClient::connect(&node.socket_path).await.unwrap();
    reader.subscribe(ResourceKind::Conversations, "inbox-9").await.unwrap();

    let first = author
        .publish(ResourceKind::Conversations, "inbox-9", Some("c1"), json!({"title": "draft"}))
        .await
        .unwrap();
    assert_eq!(first.op, ChangeOp::Insert);
    expect_event(&mut reader, WAIT).await;

    let second = author
        .publish(ResourceKind::Conversations, "inbox-9", Some("c1"), json!({"title": "final"}))
        .await
        .unwrap();
    assert_eq!(second.op, ChangeOp::Update);
    match expect_event(&mut reader, WAIT).await {
        Event::Snapshot { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].body["title"], "final");
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    author
        .retract(ResourceKind::Conversations, "inbox-9", "c1")
        .await
        .unwrap();
    match expect_event(&mut reader, WAIT).await {
        Event::Snapshot { records, .. } => assert!(records.is_empty()),
        other => panic!("expected snapshot, got {other:?}"),
    }

    let snapshot = reader
        .snapshot(ResourceKind::Conversations, "inbox-9")
        .await
        .unwrap();
    assert!(snapshot.cached);
    assert!(snapshot.records.is_empty());
}
