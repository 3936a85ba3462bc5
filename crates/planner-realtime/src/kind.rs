use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of subscribable resource. Each kind gets its own registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Comments on a task, keyed by task id.
    Comments,
    /// Users a task is shared with, keyed by task id.
    SharedTasks,
    /// Conversations a user takes part in, keyed by user id.
    Conversations,
    /// Messages of a conversation, keyed by conversation id.
    Messages,
    /// Notification stream of a user, keyed by user id.
    Notifications,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Comments,
        ResourceKind::SharedTasks,
        ResourceKind::Conversations,
        ResourceKind::Messages,
        ResourceKind::Notifications,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Comments => "comments",
            ResourceKind::SharedTasks => "shared_tasks",
            ResourceKind::Conversations => "conversations",
            ResourceKind::Messages => "messages",
            ResourceKind::Notifications => "notifications",
        }
    }

    /// Position of this kind in [`ResourceKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            ResourceKind::Comments => 0,
            ResourceKind::SharedTasks => 1,
            ResourceKind::Conversations => 2,
            ResourceKind::Messages => 3,
            ResourceKind::Notifications => 4,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == raw)
            .ok_or_else(|| {
                anyhow!(
                    "invalid resource kind '{raw}' (expected comments|shared_tasks|conversations|messages|notifications)"
                )
            })
    }
}

/// Identifies one upstream channel: a resource id within a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub kind: ResourceKind,
    pub resource_id: String,
}

impl ChannelKey {
    pub fn new(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.resource_id)
    }
}
