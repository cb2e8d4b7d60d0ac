//! Typed event emitter with an explicit listener registry.
//!
//! Every registration lives in a lock-free [`DashMap`] keyed by a monotonically
//! increasing listener id, so emission order always follows registration order
//! and one-shot listeners can be taken out of the map atomically.

use crate::subscription::Subscription;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A registered listener.
enum Slot<T> {
    /// Invoked on every emission until disposed.
    Every(Handler<T>),
    /// Removed from the registry right before its only invocation.
    Once(Handler<T>),
    /// Backing slot of a pending [`Next`] future.
    Next(oneshot::Sender<T>),
}

struct Registry<T> {
    slots: DashMap<u64, Slot<T>>,
    next_id: AtomicU64,
}

/// Error returned by [`Next`] when every handle to the emitter is gone
/// before the awaited event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event source dropped before the event occurred")]
pub struct EmitterDropped;

/// Typed publish/subscribe primitive.
///
/// Cloning an `EventEmitter` yields another handle to the same registry.
/// Listeners are invoked synchronously, in registration order, on the task
/// that calls [`emit`](Self::emit); handlers that need to do async work spawn
/// it themselves.
///
/// # Examples
///
/// ```rust
/// use saurus_events::EventEmitter;
///
/// let joins: EventEmitter<String> = EventEmitter::new();
/// let sub = joins.on(|name| println!("{name} joined"));
/// assert_eq!(joins.emit(&"Steve".to_string()), 1);
/// sub.dispose();
/// assert_eq!(joins.emit(&"Alex".to_string()), 0);
/// ```
pub struct EventEmitter<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.registry.slots.len())
            .finish()
    }
}

impl<T> Default for EventEmitter<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventEmitter<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                slots: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn insert(&self, slot: Slot<T>) -> u64 {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.slots.insert(id, slot);
        id
    }

    fn disposer(&self, id: u64) -> Subscription {
        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.slots.remove(&id);
            }
        })
    }

    /// Registers a handler invoked on every emission.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.insert(Slot::Every(Arc::new(handler)));
        self.disposer(id)
    }

    /// Registers a handler invoked on the next emission only.
    ///
    /// Delivery is exactly-once even when several tasks emit concurrently.
    pub fn once<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.insert(Slot::Once(Arc::new(handler)));
        self.disposer(id)
    }

    /// Returns a future resolving with the next emitted event.
    ///
    /// The registration happens here, not on first poll: an event emitted
    /// between this call and the first `.await` is still observed. Dropping
    /// the future before it resolves removes the registration.
    pub fn next(&self) -> Next<T> {
        let (sender, receiver) = oneshot::channel();
        let id = self.insert(Slot::Next(sender));
        Next {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every current listener in registration order.
    ///
    /// Returns the number of listeners the event was delivered to. No
    /// registry lock is held while a handler runs, so handlers may freely
    /// register or dispose listeners (including themselves).
    pub fn emit(&self, event: &T) -> usize {
        let mut ids: Vec<u64> = self.registry.slots.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();

        let mut delivered = 0;
        for id in ids {
            let persistent = match self.registry.slots.get(&id) {
                Some(slot) => match slot.value() {
                    Slot::Every(handler) => Some(handler.clone()),
                    _ => None,
                },
                None => continue,
            };

            if let Some(handler) = persistent {
                handler(event);
                delivered += 1;
                continue;
            }

            let Some((_, slot)) = self.registry.slots.remove(&id) else {
                continue;
            };
            match slot {
                Slot::Once(handler) | Slot::Every(handler) => {
                    handler(event);
                    delivered += 1;
                }
                Slot::Next(sender) => {
                    if sender.send(event.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Number of registered listeners, pending [`Next`] futures included.
    pub fn listener_count(&self) -> usize {
        self.registry.slots.len()
    }
}

/// Future returned by [`EventEmitter::next`].
#[must_use = "futures do nothing unless awaited"]
pub struct Next<T> {
    id: u64,
    receiver: oneshot::Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Future for Next<T> {
    type Output = Result<T, EmitterDropped>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map_err(|_| EmitterDropped)
    }
}

impl<T> Drop for Next<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.slots.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn handlers_run_in_registration_order() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            emitter
                .on(move |value| seen.lock().unwrap().push(format!("{tag}{value}")))
                .detach();
        }

        assert_eq!(emitter.emit(&1), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        emitter
            .once(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .detach();

        emitter.emit(&());
        emitter.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn disposed_handler_is_not_invoked() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let sub = emitter.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.dispose();

        assert_eq!(emitter.emit(&()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_dispose_itself_while_running() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let sub = emitter.on(move |_| {
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.dispose();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(emitter.emit(&()), 1);
        assert_eq!(emitter.emit(&()), 0);
    }

    #[tokio::test]
    async fn next_observes_event_emitted_before_first_poll() {
        let emitter: EventEmitter<&'static str> = EventEmitter::new();
        let next = emitter.next();
        emitter.emit(&"pong");
        assert_eq!(next.await, Ok("pong"));
    }

    #[tokio::test]
    async fn dropped_next_deregisters() {
        let emitter: EventEmitter<u8> = EventEmitter::new();
        let next = emitter.next();
        assert_eq!(emitter.listener_count(), 1);
        drop(next);
        assert_eq!(emitter.listener_count(), 0);
        assert_eq!(emitter.emit(&7), 0);
    }

    #[tokio::test]
    async fn next_fails_when_emitter_is_dropped() {
        let emitter: EventEmitter<u8> = EventEmitter::new();
        let next = emitter.next();
        drop(emitter);
        assert_eq!(next.await, Err(EmitterDropped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_emits_deliver_once_listeners_exactly_once() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = count.clone();
            emitter
                .once(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .detach();
        }

        let mut tasks = Vec::new();
        for value in 0..8 {
            let emitter = emitter.clone();
            tasks.push(tokio::spawn(async move { emitter.emit(&value) }));
        }
        let mut delivered = 0;
        for task in tasks {
            delivered += task.await.unwrap();
        }

        assert_eq!(delivered, 100);
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }
}
