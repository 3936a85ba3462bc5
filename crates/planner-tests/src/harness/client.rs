use anyhow::{Result, bail};
use planner::client::NodeClient;
use planner::protocol::{Event, PublishInfo, Request, Response, SnapshotInfo, StatsInfo};
use planner_realtime::{OptimisticWrites, Record, ResourceKind};
use std::path::Path;

/// Convenience wrapper over `NodeClient` for integration tests.
pub struct TestClient {
    inner: NodeClient,
}

impl TestClient {
    /// Connect to a node daemon at the given socket path.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let inner = NodeClient::connect(socket_path).await?;
        Ok(Self { inner })
    }

    pub fn version(&self) -> &str {
        self.inner.version()
    }

    /// Subscribe to a resource's change feed.
    pub async fn subscribe(&mut self, kind: ResourceKind, resource_id: &str) -> Result<()> {
        self.inner
            .request(Request::Subscribe {
                kind,
                resource_id: resource_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Subscribe, returning the raw response (including errors).
    pub async fn try_subscribe(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Response> {
        self.inner
            .call(Request::Subscribe {
                kind,
                resource_id: resource_id.to_string(),
            })
            .await
    }

    pub async fn unsubscribe(&mut self, kind: ResourceKind, resource_id: &str) -> Result<()> {
        self.inner
            .request(Request::Unsubscribe {
                kind,
                resource_id: resource_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Publish a record body under a resource.
    pub async fn publish(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
        record_id: Option<&str>,
        body: serde_json::Value,
    ) -> Result<PublishInfo> {
        let data = self
            .inner
            .request(Request::Publish {
                kind,
                resource_id: resource_id.to_string(),
                record_id: record_id.map(|s| s.to_string()),
                body,
            })
            .await?;
        match data {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => bail!("publish returned no data"),
        }
    }

    /// Publish, returning the raw response (including errors).
    pub async fn try_publish(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
        body: serde_json::Value,
    ) -> Result<Response> {
        self.inner
            .call(Request::Publish {
                kind,
                resource_id: resource_id.to_string(),
                record_id: None,
                body,
            })
            .await
    }

    /// Publish through an optimistic write tracker.
    pub async fn publish_optimistic(
        &mut self,
        writes: &OptimisticWrites<Record>,
        kind: ResourceKind,
        resource_id: &str,
        body: serde_json::Value,
    ) -> Result<Record> {
        self.inner
            .publish_optimistic(writes, kind, resource_id, body)
            .await
    }

    pub async fn retract(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
        record_id: &str,
    ) -> Result<Response> {
        self.inner
            .call(Request::Retract {
                kind,
                resource_id: resource_id.to_string(),
                record_id: record_id.to_string(),
            })
            .await
    }

    pub async fn snapshot(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<SnapshotInfo> {
        let data = self
            .inner
            .request(Request::Snapshot {
                kind,
                resource_id: resource_id.to_string(),
            })
            .await?;
        match data {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => bail!("snapshot returned no data"),
        }
    }

    pub async fn stats(&mut self) -> Result<StatsInfo> {
        match self.inner.request(Request::Stats).await? {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => bail!("stats returned no data"),
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.request(Request::Shutdown).await?;
        Ok(())
    }

    /// Next pushed event.
    pub async fn next_event(&mut self) -> Result<Event> {
        self.inner.next_event().await
    }
}
