//! Fan-out registry: one upstream channel per resource id, any number of
//! local subscribers.
//!
//! On every change event the entry's pump task calls the refresh function,
//! caches the result as the entry's last data, and hands it to every
//! subscriber. A subscriber that joins after data has arrived receives the
//! cached data before `subscribe` returns.
//!
//! The state lock is never held across an `.await` or while a subscriber
//! callback runs, so callbacks may subscribe or unsubscribe freely.

use crate::channel::{ChangeReceiver, ChannelClient, ChannelHandle};
use crate::config::{CoalescePolicy, RefreshErrorPolicy, RegistryConfig};
use crate::error::{RealtimeError, Result};
use crate::kind::{ChannelKey, ResourceKind};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Re-fetches the full state of a resource.
pub type RefreshFn<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Receives the refreshed state of a resource.
pub type DataCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Receives refresh failures when the registry propagates them.
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// Wrap an async closure as a [`RefreshFn`].
pub fn refresh_fn<T, F, Fut>(f: F) -> RefreshFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

type SubscriberId = u64;

struct Subscriber<T> {
    id: SubscriberId,
    on_data: DataCallback<T>,
    on_error: Option<ErrorCallback>,
    /// Sequence number of the newest data handed to this subscriber.
    seen: Arc<AtomicU64>,
}

/// Record that data `seq` is about to be handed to a subscriber. Returns
/// `false` when it already got the same or newer data.
fn advance(seen: &AtomicU64, seq: u64) -> bool {
    seen.fetch_max(seq, Ordering::SeqCst) < seq
}

struct Entry<T> {
    /// Distinguishes this entry from a later one for the same resource id.
    generation: u64,
    handle: Box<dyn ChannelHandle>,
    subscribers: Vec<Subscriber<T>>,
    last_data: Option<T>,
    /// Bumped on every successful refresh; tags `last_data`.
    data_seq: u64,
    refresh: RefreshFn<T>,
    cancel: CancellationToken,
}

impl<T> Entry<T> {
    fn close(self, kind: ResourceKind, resource_id: &str) {
        self.cancel.cancel();
        self.handle.close();
        debug!(kind = %kind, resource_id, generation = self.generation, "upstream channel closed");
    }
}

struct State<T> {
    entries: HashMap<String, Entry<T>>,
    next_generation: u64,
    next_subscriber: SubscriberId,
    disposed: bool,
}

struct Shared<T> {
    kind: ResourceKind,
    client: Arc<dyn ChannelClient>,
    config: RegistryConfig,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let kind = self.kind;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (resource_id, entry) in state.entries.drain() {
            entry.close(kind, &resource_id);
        }
    }
}

/// Multiplexes one upstream channel per resource id to local callbacks.
///
/// Cloning yields another handle to the same registry.
pub struct SubscriptionRegistry<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SubscriptionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> SubscriptionRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(kind: ResourceKind, client: Arc<dyn ChannelClient>, config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                client,
                config,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    next_generation: 0,
                    next_subscriber: 0,
                    disposed: false,
                }),
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    /// Register `on_data` for `resource_id`.
    ///
    /// Opens the upstream channel if this is the first subscriber. The entry
    /// keeps the refresh function of its first subscriber; later ones are
    /// ignored. Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        resource_id: &str,
        refresh: RefreshFn<T>,
        on_data: DataCallback<T>,
    ) -> Result<SubscriptionHandle> {
        self.register(resource_id, refresh, on_data, None)
    }

    /// Like [`subscribe`](Self::subscribe), and `on_error` receives refresh
    /// failures when the registry is configured to propagate them.
    pub fn subscribe_with_errors(
        &self,
        resource_id: &str,
        refresh: RefreshFn<T>,
        on_data: DataCallback<T>,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle> {
        self.register(resource_id, refresh, on_data, Some(on_error))
    }

    fn register(
        &self,
        resource_id: &str,
        refresh: RefreshFn<T>,
        on_data: DataCallback<T>,
        on_error: Option<ErrorCallback>,
    ) -> Result<SubscriptionHandle> {
        if resource_id.trim().is_empty() {
            return Err(RealtimeError::InvalidArgument(
                "resource id must not be empty".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        let kind = self.shared.kind;
        let seen = Arc::new(AtomicU64::new(0));

        let (subscriber_id, cached) = {
            let mut state = self.shared.lock();
            if state.disposed {
                return Err(RealtimeError::Disposed);
            }

            let subscriber_id = state.next_subscriber + 1;
            let subscriber = Subscriber {
                id: subscriber_id,
                on_data: on_data.clone(),
                on_error,
                seen: seen.clone(),
            };

            let cached = if let Some(entry) = state.entries.get_mut(resource_id) {
                entry.subscribers.push(subscriber);
                let seq = entry.data_seq;
                entry.last_data.clone().map(|data| (data, seq))
            } else {
                let key = ChannelKey::new(kind, resource_id);
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = self.shared.client.open_channel(&key, tx).map_err(|e| {
                    RealtimeError::ChannelOpen {
                        key: key.to_string(),
                        message: format!("{e:#}"),
                    }
                })?;

                state.next_generation += 1;
                let generation = state.next_generation;
                let cancel = CancellationToken::new();
                runtime.spawn(pump(
                    Arc::downgrade(&self.shared),
                    resource_id.to_string(),
                    generation,
                    rx,
                    cancel.clone(),
                ));
                state.entries.insert(
                    resource_id.to_string(),
                    Entry {
                        generation,
                        handle,
                        subscribers: vec![subscriber],
                        last_data: None,
                        data_seq: 0,
                        refresh,
                        cancel,
                    },
                );
                debug!(kind = %kind, resource_id, generation, "upstream channel opened");
                None
            };
            state.next_subscriber = subscriber_id;
            (subscriber_id, cached)
        };

        debug!(kind = %kind, resource_id, subscriber = subscriber_id, "subscribed");
        // A refresh that finished after the lock was released may already
        // have handed this subscriber newer data.
        if let Some((data, seq)) = cached
            && advance(&seen, seq)
        {
            on_data(&data);
        }

        let registry: Weak<dyn Detach> = Arc::downgrade(&self.shared) as Weak<dyn Detach>;
        Ok(SubscriptionHandle {
            registry,
            kind,
            resource_id: resource_id.to_string(),
            subscriber_id,
            released: AtomicBool::new(false),
        })
    }

    /// Close every upstream channel and drop every entry.
    /// Returns the number of channels closed.
    pub fn unsubscribe_all(&self) -> usize {
        let kind = self.shared.kind;
        let mut state = self.shared.lock();
        let drained: Vec<(String, Entry<T>)> = state.entries.drain().collect();
        let count = drained.len();
        for (resource_id, entry) in drained {
            entry.close(kind, &resource_id);
        }
        count
    }

    /// Tear the registry down. Later subscriptions fail with
    /// [`RealtimeError::Disposed`].
    pub fn dispose(&self) -> usize {
        self.shared.lock().disposed = true;
        self.unsubscribe_all()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Number of open upstream channels.
    pub fn open_channels(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn subscriber_count(&self, resource_id: &str) -> usize {
        self.shared
            .lock()
            .entries
            .get(resource_id)
            .map_or(0, |e| e.subscribers.len())
    }

    pub fn total_subscribers(&self) -> usize {
        self.shared
            .lock()
            .entries
            .values()
            .map(|e| e.subscribers.len())
            .sum()
    }

    /// Data from the most recent successful refresh, if the entry exists.
    pub fn last_data(&self, resource_id: &str) -> Option<T> {
        self.shared
            .lock()
            .entries
            .get(resource_id)
            .and_then(|e| e.last_data.clone())
    }

    pub fn resource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

enum Fanout<T> {
    Data(T, u64, Vec<(DataCallback<T>, Arc<AtomicU64>)>),
    Failure(RealtimeError, Vec<ErrorCallback>),
}

impl<T> Shared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refresh_for(&self, resource_id: &str, generation: u64) -> Option<RefreshFn<T>> {
        self.lock()
            .entries
            .get(resource_id)
            .filter(|e| e.generation == generation)
            .map(|e| e.refresh.clone())
    }

    fn deliver(&self, resource_id: &str, generation: u64, result: anyhow::Result<T>) {
        let fanout = {
            let mut state = self.lock();
            let Some(entry) = state
                .entries
                .get_mut(resource_id)
                .filter(|e| e.generation == generation)
            else {
                debug!(
                    kind = %self.kind,
                    resource_id,
                    generation,
                    "entry gone, discarding refresh result"
                );
                return;
            };

            match result {
                Ok(data) => {
                    entry.last_data = Some(data.clone());
                    entry.data_seq += 1;
                    let callbacks = entry
                        .subscribers
                        .iter()
                        .map(|s| (s.on_data.clone(), s.seen.clone()))
                        .collect();
                    Fanout::Data(data, entry.data_seq, callbacks)
                }
                Err(e) => {
                    let failure = RealtimeError::RefreshFailure {
                        resource_id: resource_id.to_string(),
                        message: format!("{e:#}"),
                    };
                    warn!(
                        kind = %self.kind,
                        resource_id,
                        err = %failure,
                        "refresh failed, keeping last data"
                    );
                    match self.config.refresh_errors {
                        RefreshErrorPolicy::Swallow => return,
                        RefreshErrorPolicy::Propagate => {
                            let callbacks = entry
                                .subscribers
                                .iter()
                                .filter_map(|s| s.on_error.clone())
                                .collect();
                            Fanout::Failure(failure, callbacks)
                        }
                    }
                }
            }
        };

        match fanout {
            Fanout::Data(data, seq, callbacks) => {
                for (callback, seen) in callbacks {
                    if advance(&seen, seq) {
                        callback(&data);
                    }
                }
            }
            Fanout::Failure(failure, callbacks) => {
                for callback in callbacks {
                    callback(&failure);
                }
            }
        }
    }
}

/// Run one refresh for the entry and fan the result out.
/// Returns `false` once the entry (or the registry) is gone.
async fn refresh_once<T>(shared: &Weak<Shared<T>>, resource_id: &str, generation: u64) -> bool
where
    T: Clone + Send + Sync + 'static,
{
    let Some(shared) = shared.upgrade() else {
        return false;
    };
    let Some(refresh) = shared.refresh_for(resource_id, generation) else {
        return false;
    };

    let fut = refresh();
    let result = match shared.config.refresh_timeout() {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "refresh timed out after {}ms",
                limit.as_millis()
            )),
        },
        None => fut.await,
    };
    shared.deliver(resource_id, generation, result);
    true
}

/// Per-entry event loop. Events for one resource are handled strictly in
/// order; an in-flight refresh is never interrupted by cancellation.
async fn pump<T>(
    shared: Weak<Shared<T>>,
    resource_id: String,
    generation: u64,
    mut events: ChangeReceiver,
    cancel: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
{
    let Some((coalesce, initial_fetch)) = shared
        .upgrade()
        .map(|s| (s.config.coalesce, s.config.initial_fetch))
    else {
        return;
    };

    if initial_fetch && !refresh_once(&shared, &resource_id, generation).await {
        return;
    }

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut merged = 0usize;
        if coalesce == CoalescePolicy::Latest {
            while events.try_recv().is_ok() {
                merged += 1;
            }
        }
        debug!(key = %event.key, op = ?event.op, merged, "change event");

        if !refresh_once(&shared, &resource_id, generation).await {
            break;
        }
    }
    debug!(resource_id = %resource_id, generation, "pump stopped");
}

trait Detach: Send + Sync {
    fn detach(&self, resource_id: &str, subscriber_id: SubscriberId) -> bool;
}

impl<T> Detach for Shared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn detach(&self, resource_id: &str, subscriber_id: SubscriberId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(resource_id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|s| s.id != subscriber_id);
        if entry.subscribers.len() == before {
            return false;
        }
        debug!(kind = %self.kind, resource_id, subscriber = subscriber_id, "unsubscribed");

        if entry.subscribers.is_empty()
            && let Some(entry) = state.entries.remove(resource_id)
        {
            // Closed under the lock so a concurrent subscribe cannot open a
            // second channel for this id before the first one is gone.
            entry.close(self.kind, resource_id);
        }
        true
    }
}

/// Returned by `subscribe`. Removal is explicit: dropping the handle keeps
/// the subscription alive.
pub struct SubscriptionHandle {
    registry: Weak<dyn Detach>,
    kind: ResourceKind,
    resource_id: String,
    subscriber_id: SubscriberId,
    released: AtomicBool,
}

impl SubscriptionHandle {
    /// Remove this subscriber. The last one out closes the upstream channel.
    /// Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.registry
            .upgrade()
            .is_some_and(|r| r.detach(&self.resource_id, self.subscriber_id))
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("kind", &self.kind)
            .field("resource_id", &self.resource_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("active", &self.is_active())
            .finish()
    }
}
