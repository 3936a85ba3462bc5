use crate::channel::ChannelClient;
use crate::config::RegistryConfig;
use crate::error::Result;
use crate::kind::ResourceKind;
use crate::registry::{
    DataCallback, ErrorCallback, RefreshFn, SubscriptionHandle, SubscriptionRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Per-kind counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub kind: ResourceKind,
    pub open_channels: usize,
    pub subscribers: usize,
}

/// One [`SubscriptionRegistry`] per [`ResourceKind`], created and disposed
/// together by whoever owns the application's realtime layer.
pub struct RealtimeHub<T> {
    registries: [SubscriptionRegistry<T>; 5],
}

impl<T> RealtimeHub<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn create(client: Arc<dyn ChannelClient>, config: RegistryConfig) -> Self {
        let registries = ResourceKind::ALL
            .map(|kind| SubscriptionRegistry::new(kind, client.clone(), config.clone()));
        Self { registries }
    }

    pub fn registry(&self, kind: ResourceKind) -> &SubscriptionRegistry<T> {
        &self.registries[kind.index()]
    }

    pub fn subscribe(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        refresh: RefreshFn<T>,
        on_data: DataCallback<T>,
    ) -> Result<SubscriptionHandle> {
        self.registry(kind).subscribe(resource_id, refresh, on_data)
    }

    pub fn subscribe_with_errors(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        refresh: RefreshFn<T>,
        on_data: DataCallback<T>,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle> {
        self.registry(kind)
            .subscribe_with_errors(resource_id, refresh, on_data, on_error)
    }

    pub fn stats(&self) -> Vec<KindStats> {
        self.registries
            .iter()
            .map(|r| KindStats {
                kind: r.kind(),
                open_channels: r.open_channels(),
                subscribers: r.total_subscribers(),
            })
            .collect()
    }

    /// Close every channel of every kind, e.g. on sign-out.
    pub fn unsubscribe_all(&self) -> usize {
        self.registries.iter().map(|r| r.unsubscribe_all()).sum()
    }

    /// Dispose all registries. Returns the number of channels closed.
    pub fn dispose(&self) -> usize {
        let closed: usize = self.registries.iter().map(|r| r.dispose()).sum();
        info!(closed, "realtime hub disposed");
        closed
    }
}
