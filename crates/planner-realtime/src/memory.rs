use crate::channel::{ChangeEvent, ChangeOp, ChangeSender, ChannelClient, ChannelHandle};
use crate::kind::ChannelKey;
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A record stored under a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub body: serde_json::Value,
    pub updated_at_ms: u64,
}

#[derive(Default)]
struct BackendState {
    /// Records per resource, in insertion order. Updates keep their position.
    records: HashMap<ChannelKey, Vec<Record>>,
    /// Open channels per resource: channel id → sender.
    channels: HashMap<ChannelKey, Vec<(u64, ChangeSender)>>,
    next_channel: u64,
    opened: usize,
    closed: usize,
}

/// In-process record store that doubles as an upstream channel client.
///
/// Every mutation notifies each open channel for the touched resource.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record and notify open channels.
    pub fn upsert(
        &self,
        key: &ChannelKey,
        record_id: impl Into<String>,
        body: serde_json::Value,
    ) -> (Record, ChangeOp) {
        let record = Record {
            id: record_id.into(),
            body,
            updated_at_ms: now_ms(),
        };
        let mut state = self.lock();
        let records = state.records.entry(key.clone()).or_default();
        let op = if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record.clone();
            ChangeOp::Update
        } else {
            records.push(record.clone());
            ChangeOp::Insert
        };
        notify(&mut state, key, op);
        (record, op)
    }

    /// Remove a record. Returns `false` if it did not exist.
    pub fn retract(&self, key: &ChannelKey, record_id: &str) -> bool {
        let mut state = self.lock();
        let Some(records) = state.records.get_mut(key) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.id != record_id);
        if records.len() == before {
            return false;
        }
        notify(&mut state, key, ChangeOp::Delete);
        true
    }

    /// Current records of a resource.
    pub fn fetch(&self, key: &ChannelKey) -> Vec<Record> {
        self.lock().records.get(key).cloned().unwrap_or_default()
    }

    /// Push a bare notification without touching any record.
    /// Returns the number of channels notified.
    pub fn emit(&self, key: &ChannelKey, op: ChangeOp) -> usize {
        notify(&mut self.lock(), key, op)
    }

    /// Total channels ever opened.
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Total channels closed.
    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    pub fn open_channel_count(&self) -> usize {
        self.lock().channels.values().map(Vec::len).sum()
    }

    pub fn open_channels_for(&self, key: &ChannelKey) -> usize {
        self.lock().channels.get(key).map_or(0, Vec::len)
    }
}

fn notify(state: &mut BackendState, key: &ChannelKey, op: ChangeOp) -> usize {
    let Some(senders) = state.channels.get_mut(key) else {
        return 0;
    };
    // Receivers that went away are pruned here.
    senders.retain(|(_, tx)| {
        tx.send(ChangeEvent {
            key: key.clone(),
            op,
        })
        .is_ok()
    });
    senders.len()
}

impl ChannelClient for MemoryBackend {
    fn open_channel(
        &self,
        key: &ChannelKey,
        events: ChangeSender,
    ) -> anyhow::Result<Box<dyn ChannelHandle>> {
        let mut state = self.lock();
        state.next_channel += 1;
        let id = state.next_channel;
        state.opened += 1;
        state
            .channels
            .entry(key.clone())
            .or_default()
            .push((id, events));
        debug!(key = %key, channel = id, "memory channel opened");
        Ok(Box::new(MemoryChannel {
            backend: self.clone(),
            key: key.clone(),
            id,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryChannel {
    backend: MemoryBackend,
    key: ChannelKey,
    id: u64,
    closed: AtomicBool,
}

impl ChannelHandle for MemoryChannel {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.backend.lock();
        state.closed += 1;
        if let Some(senders) = state.channels.get_mut(&self.key) {
            senders.retain(|(id, _)| *id != self.id);
            if senders.is_empty() {
                state.channels.remove(&self.key);
            }
        }
        debug!(key = %self.key, channel = self.id, "memory channel closed");
    }
}
