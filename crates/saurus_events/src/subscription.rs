//! Disposers returned by every listener registration.

use crate::emitter::EventEmitter;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// Handle to a registered listener.
///
/// Dropping a `Subscription` does **not** remove the listener: ownership of a
/// subscription is an explicit contract, released with [`dispose`](Self::dispose)
/// or handed to another entity's lifetime with [`dispose_on`](Self::dispose_on).
/// Use [`detach`](Self::detach) to state that a listener lives as long as its
/// emitter.
#[must_use = "call dispose(), dispose_on() or detach() to decide the listener's lifetime"]
pub struct Subscription {
    disposer: Option<Disposer>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

impl Subscription {
    /// Wraps an arbitrary disposer.
    pub fn new<F>(disposer: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// A subscription whose disposal does nothing.
    pub fn noop() -> Self {
        Self { disposer: None }
    }

    /// Removes the listener.
    pub fn dispose(mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    /// Leaves the listener registered for the lifetime of its emitter.
    pub fn detach(mut self) {
        self.disposer.take();
    }

    /// Ties this subscription to another entity's "ended" notification.
    ///
    /// The listener is removed when `ended` fires or when the returned
    /// subscription is disposed, whichever happens first. Either path also
    /// removes the internal hook on `ended`.
    pub fn dispose_on<E>(self, ended: &EventEmitter<E>) -> Subscription
    where
        E: Clone + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(self)));

        let hook_slot = slot.clone();
        let hook = ended.once(move |_| take_and_dispose(&hook_slot));

        Subscription::new(move || {
            hook.dispose();
            take_and_dispose(&slot);
        })
    }
}

fn take_and_dispose(slot: &Mutex<Option<Subscription>>) {
    let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(subscription) = taken {
        subscription.dispose();
    }
}

/// A bag of subscriptions released together.
#[derive(Default)]
pub struct Subscriptions {
    inner: Mutex<Vec<Subscription>>,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions").field("len", &self.len()).finish()
    }
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, subscription: Subscription) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
    }

    /// Disposes every held subscription. Subscriptions pushed afterwards are
    /// held until the next call.
    pub fn dispose_all(&self) {
        let drained: Vec<Subscription> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for subscription in drained {
            subscription.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
