//! Upstream channel abstraction.
//!
//! A [`ChannelClient`] opens one push subscription per [`ChannelKey`] and
//! forwards change notifications into the [`ChangeSender`] it was handed.
//! Notifications carry no trusted payload: consumers always re-fetch.

use crate::kind::ChannelKey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What the upstream says happened. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    Unknown,
}

/// A change notification for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: ChannelKey,
    pub op: ChangeOp,
}

pub type ChangeSender = mpsc::UnboundedSender<ChangeEvent>;
pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

/// Opens upstream channels.
///
/// Implementations are called while the registry holds its state lock, so
/// they must not call back into the registry.
pub trait ChannelClient: Send + Sync {
    fn open_channel(
        &self,
        key: &ChannelKey,
        events: ChangeSender,
    ) -> anyhow::Result<Box<dyn ChannelHandle>>;
}

/// An open upstream channel. `close` must be idempotent.
pub trait ChannelHandle: Send + Sync {
    fn close(&self);
}
