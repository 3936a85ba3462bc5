pub mod channel;
pub mod config;
pub mod error;
pub mod hub;
pub mod kind;
pub mod memory;
pub mod optimistic;
pub mod registry;

pub use channel::{ChangeEvent, ChangeOp, ChangeSender, ChannelClient, ChannelHandle};
pub use config::{CoalescePolicy, RefreshErrorPolicy, RegistryConfig};
pub use error::{RealtimeError, Result};
pub use hub::{KindStats, RealtimeHub};
pub use kind::{ChannelKey, ResourceKind};
pub use memory::{MemoryBackend, Record};
pub use optimistic::{LocalRecord, OptimisticWrites};
pub use registry::{
    DataCallback, ErrorCallback, RefreshFn, SubscriptionHandle, SubscriptionRegistry, refresh_fn,
};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
