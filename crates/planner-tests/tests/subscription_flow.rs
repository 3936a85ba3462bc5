use planner::protocol::Event;
use planner_realtime::ResourceKind;
use planner_tests::harness::{
    client::TestClient, expect_event, init_tracing, node::TestNode, poll_stats_until,
    unwrap_error_code,
};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn hello_carries_version() {
    let node = TestNode::spawn().await.unwrap();
    let client = TestClient::connect(&node.socket_path).await.unwrap();
    assert!(!client.version().is_empty());
}

#[tokio::test]
async fn two_clients_share_one_channel() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();

    let mut alice = TestClient::connect(&node.socket_path).await.unwrap();
    let mut bob = TestClient::connect(&node.socket_path).await.unwrap();

    alice.subscribe(ResourceKind::Messages, "conv-1").await.unwrap();
    bob.subscribe(ResourceKind::Messages, "conv-1").await.unwrap();
    assert_eq!(node.backend().opened(), 1);

    alice
        .publish(ResourceKind::Messages, "conv-1", None, json!({"text": "hello bob"}))
        .await
        .unwrap();

    for client in [&mut alice, &mut bob] {
        match expect_event(client, WAIT).await {
            Event::Snapshot {
                kind,
                resource_id,
                records,
            } => {
                assert_eq!(kind, ResourceKind::Messages);
                assert_eq!(resource_id, "conv-1");
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].body["text"], "hello bob");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    let stats = bob.stats().await.unwrap();
    assert_eq!(stats.open_channels(), 1);
    assert_eq!(stats.subscribers(), 2);
    assert_eq!(stats.connections, 2);
}

#[tokio::test]
async fn disconnect_releases_last_channel() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();

    let mut watcher = TestClient::connect(&node.socket_path).await.unwrap();
    {
        let mut alice = TestClient::connect(&node.socket_path).await.unwrap();
        alice.subscribe(ResourceKind::Comments, "task-7").await.unwrap();
        assert_eq!(node.backend().open_channel_count(), 1);
    }

    let stats = poll_stats_until(&mut watcher, WAIT, |s| s.open_channels() == 0).await;
    assert_eq!(stats.open_channels(), 0);
    assert_eq!(stats.channels_closed, 1);
    assert_eq!(stats.connections, 1);
}

#[tokio::test]
async fn unsubscribed_client_stops_receiving() {
    init_tracing();
    let node = TestNode::spawn().await.unwrap();

    let mut alice = TestClient::connect(&node.socket_path).await.unwrap();
    let mut bob = TestClient::connect(&node.socket_path).await.unwrap();
    alice.subscribe(ResourceKind::Notifications, "user-1").await.unwrap();
    bob.subscribe(ResourceKind::Notifications, "user-1").await.unwrap();

    alice.unsubscribe(ResourceKind::Notifications, "user-1").await.unwrap();
    assert_eq!(node.backend().open_channel_count(), 1);

    bob.publish(ResourceKind::Notifications, "user-1", Some("n1"), json!("ping"))
        .await
        .unwrap();
    assert!(matches!(expect_event(&mut bob, WAIT).await, Event::Snapshot { .. }));

    let nothing = tokio::time::timeout(Duration::from_millis(150), alice.next_event()).await;
    assert!(nothing.is_err(), "unsubscribed client got {nothing:?}");
}

#[tokio::test]
async fn kinds_are_independent() {
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();

    client.subscribe(ResourceKind::Comments, "42").await.unwrap();
    client.subscribe(ResourceKind::SharedTasks, "42").await.unwrap();
    assert_eq!(node.backend().opened(), 2);

    client
        .publish(ResourceKind::SharedTasks, "42", Some("u1"), json!({"user": "sam"}))
        .await
        .unwrap();
    match expect_event(&mut client, WAIT).await {
        Event::Snapshot { kind, .. } => assert_eq!(kind, ResourceKind::SharedTasks),
        other => panic!("expected snapshot, got {other:?}"),
    }

    let comments = client.snapshot(ResourceKind::Comments, "42").await.unwrap();
    assert!(comments.records.is_empty());
}

#[tokio::test]
async fn invalid_requests_report_codes() {
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();

    let resp = client.try_subscribe(ResourceKind::Messages, "").await.unwrap();
    assert_eq!(unwrap_error_code(resp), "invalid_argument");

    client.subscribe(ResourceKind::Messages, "conv-1").await.unwrap();
    let resp = client.try_subscribe(ResourceKind::Messages, "conv-1").await.unwrap();
    assert_eq!(unwrap_error_code(resp), "already_subscribed");

    let resp = client
        .retract(ResourceKind::Messages, "conv-1", "missing")
        .await
        .unwrap();
    assert_eq!(unwrap_error_code(resp), "not_found");
}

#[tokio::test]
async fn client_shutdown_stops_node() {
    let node = TestNode::spawn().await.unwrap();
    let mut client = TestClient::connect(&node.socket_path).await.unwrap();
    client.shutdown().await.unwrap();
    assert!(node.state.shutdown.is_cancelled());
}
