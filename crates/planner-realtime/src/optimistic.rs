//! Optimistic writes for comments and messages.
//!
//! A caller builds a record with a temporary id, shows it right away through
//! [`OptimisticWrites::apply_optimistic`], and either confirms it or rolls it
//! back when the write resolves. Rollbacks only reach the handlers registered
//! for that resource; nothing is broadcast to other subscribers.

use crate::error::RealtimeError;
use crate::memory::Record;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A record that can be tracked while its write is in flight.
pub trait LocalRecord {
    fn local_id(&self) -> &str;
}

impl LocalRecord for Record {
    fn local_id(&self) -> &str {
        &self.id
    }
}

pub type ApplyHandler<R> = Arc<dyn Fn(&R) + Send + Sync>;
pub type RollbackHandler<R> = Arc<dyn Fn(&R, &RealtimeError) + Send + Sync>;

struct Slot<R> {
    on_apply: ApplyHandler<R>,
    on_rollback: RollbackHandler<R>,
    /// Local ids applied but neither confirmed nor rolled back.
    pending: HashSet<String>,
}

pub struct OptimisticWrites<R> {
    slots: Mutex<HashMap<String, Slot<R>>>,
}

impl<R> Default for OptimisticWrites<R> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Temporary id for a locally created record.
pub fn temp_id() -> String {
    format!("temp-{}", uuid::Uuid::new_v4())
}

impl<R: LocalRecord> OptimisticWrites<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<R>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the apply/rollback pair for a resource, replacing any previous
    /// pair. Pending writes of a replaced pair are forgotten.
    pub fn register_handlers(
        &self,
        resource_id: &str,
        on_apply: ApplyHandler<R>,
        on_rollback: RollbackHandler<R>,
    ) {
        self.lock().insert(
            resource_id.to_string(),
            Slot {
                on_apply,
                on_rollback,
                pending: HashSet::new(),
            },
        );
    }

    pub fn unregister_handlers(&self, resource_id: &str) -> bool {
        self.lock().remove(resource_id).is_some()
    }

    /// Show `record` through the registered apply handler.
    /// No-op (returns `false`) when nothing is registered for the resource.
    pub fn apply_optimistic(&self, resource_id: &str, record: &R) -> bool {
        let handler = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(resource_id) else {
                return false;
            };
            slot.pending.insert(record.local_id().to_string());
            slot.on_apply.clone()
        };
        handler(record);
        true
    }

    /// Roll `record` back after its write failed. Only a pending record is
    /// rolled back, so this runs the rollback handler at most once per
    /// applied record.
    pub fn apply_optimistic_error(
        &self,
        resource_id: &str,
        record: &R,
        error: impl fmt::Display,
    ) -> bool {
        let handler = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(resource_id) else {
                return false;
            };
            if !slot.pending.remove(record.local_id()) {
                return false;
            }
            slot.on_rollback.clone()
        };
        let failure = RealtimeError::OptimisticWriteFailure {
            resource_id: resource_id.to_string(),
            local_id: record.local_id().to_string(),
            reason: error.to_string(),
        };
        debug!(
            resource_id,
            local_id = record.local_id(),
            err = %failure,
            "rolling back optimistic write"
        );
        handler(record, &failure);
        true
    }

    /// The write for `local_id` succeeded; a later error must not roll it back.
    pub fn confirm(&self, resource_id: &str, local_id: &str) -> bool {
        self.lock()
            .get_mut(resource_id)
            .is_some_and(|slot| slot.pending.remove(local_id))
    }

    pub fn pending_count(&self, resource_id: &str) -> usize {
        self.lock().get(resource_id).map_or(0, |s| s.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local(body: &str) -> Record {
        Record {
            id: temp_id(),
            body: json!(body),
            updated_at_ms: 0,
        }
    }

    /// Handlers that mirror a UI list: apply appends, rollback removes.
    fn list_handlers(
        list: &Arc<Mutex<Vec<Record>>>,
        rollbacks: &Arc<Mutex<Vec<String>>>,
    ) -> (ApplyHandler<Record>, RollbackHandler<Record>) {
        let apply_list = list.clone();
        let rollback_list = list.clone();
        let rollbacks = rollbacks.clone();
        (
            Arc::new(move |r: &Record| apply_list.lock().unwrap().push(r.clone())),
            Arc::new(move |r: &Record, e: &RealtimeError| {
                rollback_list.lock().unwrap().retain(|x| x.id != r.id);
                rollbacks.lock().unwrap().push(e.to_string());
            }),
        )
    }

    #[test]
    fn apply_without_handlers_is_noop() {
        let writes = OptimisticWrites::<Record>::new();
        let record = local("hi");
        assert!(!writes.apply_optimistic("conv-1", &record));
        assert!(!writes.apply_optimistic_error("conv-1", &record, "offline"));
    }

    #[test]
    fn error_after_apply_rolls_back_exactly_once() {
        let writes = OptimisticWrites::new();
        let list = Arc::new(Mutex::new(Vec::new()));
        let rollbacks = Arc::new(Mutex::new(Vec::new()));
        let (apply, rollback) = list_handlers(&list, &rollbacks);
        writes.register_handlers("conv-1", apply, rollback);

        let record = local("hello");
        assert!(writes.apply_optimistic("conv-1", &record));
        assert_eq!(list.lock().unwrap().len(), 1);
        assert_eq!(writes.pending_count("conv-1"), 1);

        assert!(writes.apply_optimistic_error("conv-1", &record, "insert rejected"));
        assert!(!writes.apply_optimistic_error("conv-1", &record, "insert rejected"));

        assert!(list.lock().unwrap().is_empty());
        let rollbacks = rollbacks.lock().unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert!(rollbacks[0].contains("insert rejected"));
        assert!(rollbacks[0].contains(&record.id));
    }

    #[test]
    fn confirmed_write_is_not_rolled_back() {
        let writes = OptimisticWrites::new();
        let list = Arc::new(Mutex::new(Vec::new()));
        let rollbacks = Arc::new(Mutex::new(Vec::new()));
        let (apply, rollback) = list_handlers(&list, &rollbacks);
        writes.register_handlers("conv-1", apply, rollback);

        let record = local("kept");
        writes.apply_optimistic("conv-1", &record);
        assert!(writes.confirm("conv-1", &record.id));
        assert!(!writes.apply_optimistic_error("conv-1", &record, "late failure"));
        assert_eq!(list.lock().unwrap().len(), 1);
        assert!(rollbacks.lock().unwrap().is_empty());
    }

    #[test]
    fn handlers_are_scoped_to_their_resource() {
        let writes = OptimisticWrites::new();
        let list = Arc::new(Mutex::new(Vec::new()));
        let rollbacks = Arc::new(Mutex::new(Vec::new()));
        let (apply, rollback) = list_handlers(&list, &rollbacks);
        writes.register_handlers("conv-1", apply, rollback);

        assert!(!writes.apply_optimistic("conv-2", &local("elsewhere")));
        assert!(list.lock().unwrap().is_empty());

        assert!(writes.unregister_handlers("conv-1"));
        assert!(!writes.apply_optimistic("conv-1", &local("gone")));
    }

    #[test]
    fn temp_ids_are_unique() {
        let a = temp_id();
        let b = temp_id();
        assert!(a.starts_with("temp-"));
        assert_ne!(a, b);
    }
}
