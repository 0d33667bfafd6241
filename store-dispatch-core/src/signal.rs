//! Continuously-valued store state
//!
//! Each store instance keeps its current state in a [`StateCell`]: a plain
//! mutable slot plus one unbounded queue per listener, fed on every later
//! write. The pipeline writes
//! into the cell directly; nothing in the engine ever listens to a cell in
//! order to feed it.
//!
//! Consumers observe the cell through a [`StateSignal`]. Subscribing yields
//! the current value followed by every later write. The first subscriber
//! activates the owning instance, dropping the last one tears it down.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::trace;

use crate::error::Error;

/// Lifecycle hooks of whatever owns a [`StateCell`].
pub(crate) trait Activate: Send + Sync {
    /// Called when the subscriber count goes from zero to one
    fn activate(&self);
    /// Called when the subscriber count drops back to zero
    fn deactivate(&self);
}

/// Mutable current-state slot with a per-listener change queue.
pub(crate) struct StateCell {
    name: String,
    slot: Mutex<Slot>,
    subscribers: Mutex<usize>,
}

struct Slot {
    value: Value,
    listeners: Vec<mpsc::UnboundedSender<Value>>,
}

impl Slot {
    fn listen(&mut self) -> mpsc::UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.push(sender);
        receiver
    }
}

impl StateCell {
    pub(crate) fn new(name: impl Into<String>, initial: Value) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(Slot {
                value: initial,
                listeners: Vec::new(),
            }),
            subscribers: Mutex::new(0),
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get(&self) -> Value {
        self.lock_slot().value.clone()
    }

    /// Replace the current value and notify every listener
    pub(crate) fn inject(&self, next: Value) {
        let mut slot = self.lock_slot();
        // Sent under the lock so `snapshot` never sees a value twice.
        slot.listeners
            .retain(|listener| listener.send(next.clone()).is_ok());
        slot.value = next;
    }

    /// Listen for later writes only
    pub(crate) fn changes(&self) -> mpsc::UnboundedReceiver<Value> {
        self.lock_slot().listen()
    }

    /// The current value and a receiver for every write after it
    fn snapshot(&self) -> (Value, mpsc::UnboundedReceiver<Value>) {
        let mut slot = self.lock_slot();
        (slot.value.clone(), slot.listen())
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        let mut slot = self.lock_slot();
        slot.listeners.retain(|listener| !listener.is_closed());
        slot.listeners.len()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}

/// Handle to a store instance's current state.
///
/// Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct StateSignal {
    cell: Arc<StateCell>,
    owner: Arc<dyn Activate>,
}

impl StateSignal {
    pub(crate) fn new(cell: Arc<StateCell>, owner: Arc<dyn Activate>) -> Self {
        Self { cell, owner }
    }

    /// The resolved store name
    pub fn name(&self) -> &str {
        self.cell.name()
    }

    /// The current state
    pub fn get(&self) -> Value {
        self.cell.get()
    }

    /// The current state, deserialized
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.get()).map_err(|source| Error::StateShape {
            store: self.name().to_string(),
            source,
        })
    }

    /// Observe the current state and every later change.
    ///
    /// The first live subscription activates the instance: from then on it
    /// takes actions off the dispatcher. Must be called within a tokio
    /// runtime when it activates.
    pub fn subscribe(&self) -> Subscription {
        let (initial, changes) = self.cell.snapshot();
        let mut subscribers = self
            .cell
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *subscribers += 1;
        if *subscribers == 1 {
            trace!(store = %self.name(), "First subscriber, activating");
            self.owner.activate();
        }
        drop(subscribers);

        Subscription {
            initial: Some(initial),
            changes: UnboundedReceiverStream::new(changes),
            cell: Arc::clone(&self.cell),
            owner: Arc::clone(&self.owner),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        *self
            .cell
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles observe the same instance
    pub fn ptr_eq(&self, other: &StateSignal) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for StateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSignal")
            .field("name", &self.name())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live subscription to a [`StateSignal`].
///
/// Yields the state current at subscription time, then every later write.
/// Dropping the last subscription of an instance tears the instance down.
pub struct Subscription {
    initial: Option<Value>,
    changes: UnboundedReceiverStream<Value>,
    cell: Arc<StateCell>,
    owner: Arc<dyn Activate>,
}

impl Subscription {
    /// The resolved store name
    pub fn name(&self) -> &str {
        self.cell.name()
    }

    /// The current state, regardless of what this subscription has yielded
    pub fn get(&self) -> Value {
        self.cell.get()
    }

    /// Take the value current at subscription time, if not yet yielded
    pub fn take_initial(&mut self) -> Option<Value> {
        self.initial.take()
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let this = self.get_mut();
        if let Some(initial) = this.initial.take() {
            return Poll::Ready(Some(initial));
        }
        Poll::Ready(ready!(Pin::new(&mut this.changes).poll_next(cx)))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self
            .cell
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *subscribers = subscribers.saturating_sub(1);
        if *subscribers == 0 {
            trace!(store = %self.cell.name(), "Last subscriber gone, tearing down");
            self.owner.deactivate();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.cell.name())
            .finish_non_exhaustive()
    }
}
