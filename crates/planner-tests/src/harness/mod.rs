pub mod client;
pub mod node;

use planner::protocol::{Event, Response, StatsInfo};
use std::time::Duration;

/// Poll stats until `check` holds, or timeout. Returns the last stats seen.
pub async fn poll_stats_until(
    client: &mut client::TestClient,
    timeout: Duration,
    check: impl Fn(&StatsInfo) -> bool,
) -> StatsInfo {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = client.stats().await.unwrap();
        if check(&stats) || tokio::time::Instant::now() >= deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait for the next pushed event, panicking after `timeout`.
pub async fn expect_event(client: &mut client::TestClient, timeout: Duration) -> Event {
    match tokio::time::timeout(timeout, client.next_event()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("connection failed while waiting for event: {e:#}"),
        Err(_) => panic!("no event within {timeout:?}"),
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("planner=debug,planner_node=debug,planner_realtime=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Extract data from an Ok response, or panic.
pub fn unwrap_ok_data(resp: Response) -> Option<serde_json::Value> {
    match resp {
        Response::Ok { data } => data,
        Response::Error { code, message } => panic!("expected Ok, got Error({code}): {message}"),
        other => panic!("expected Ok, got {other:?}"),
    }
}

/// Extract the error code from an Error response, or panic.
pub fn unwrap_error_code(resp: Response) -> String {
    match resp {
        Response::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}
