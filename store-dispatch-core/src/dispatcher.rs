//! Dispatch gateway and the multicast action channel
//!
//! A [`Dispatcher`] owns one registry of listeners, one id sequence and a
//! subscription pulse. Anything handed to [`Dispatcher::dispatch`] is
//! filtered down to map-shaped values, stamped and delivered to every
//! listener attached at that moment. Each listener has its own unbounded
//! queue: a slow listener delays only itself and never loses actions.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use store_dispatch_core::{Dispatched, Dispatcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = Dispatcher::new();
//! let mut listener = dispatcher.subscribe();
//!
//! assert!(matches!(dispatcher.dispatch(json!({"type": "load"})), Dispatched::Action(_)));
//! assert!(matches!(dispatcher.dispatch(json!("not an action")), Dispatched::Ignored));
//!
//! let action = listener.try_recv().unwrap();
//! assert_eq!(action.action_type(), Some("load"));
//! assert!(listener.try_recv().is_none());
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::action::{action_fields, Action, ActionId, IdGenerator};
use crate::config::EngineConfig;
use crate::error::Error;

/// A boxed discrete sequence of candidate actions
pub type ActionStream = Pin<Box<dyn Stream<Item = Value> + Send + 'static>>;

/// Anything that can be handed to [`Dispatcher::dispatch`].
pub enum Dispatchable {
    /// Nothing to dispatch
    Empty,
    /// A single candidate action; dropped unless it is a JSON object
    Value(Value),
    /// A discrete sequence of candidate actions
    Sequence(ActionStream),
    /// A continuously-valued signal: its current and future values are
    /// dispatched, and its latest value is replayed to new listeners
    Signal(watch::Receiver<Value>),
}

impl Dispatchable {
    /// Dispatch every item of an iterator, in order
    pub fn sequence<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self::Sequence(Box::pin(tokio_stream::iter(items)))
    }

    /// Dispatch every item a stream yields
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self::Sequence(Box::pin(stream))
    }

    /// Serialize a typed action
    pub fn serialize<T: Serialize + ?Sized>(action: &T) -> Result<Self, Error> {
        serde_json::to_value(action)
            .map(Self::Value)
            .map_err(Error::Serialize)
    }
}

impl fmt::Debug for Dispatchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatchable::Empty => f.write_str("Empty"),
            Dispatchable::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Dispatchable::Sequence(_) => f.write_str("Sequence(..)"),
            Dispatchable::Signal(_) => f.write_str("Signal(..)"),
        }
    }
}

impl From<()> for Dispatchable {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<Value> for Dispatchable {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Map<String, Value>> for Dispatchable {
    fn from(fields: Map<String, Value>) -> Self {
        Self::Value(Value::Object(fields))
    }
}

impl From<watch::Receiver<Value>> for Dispatchable {
    fn from(signal: watch::Receiver<Value>) -> Self {
        Self::Signal(signal)
    }
}

impl From<ActionStream> for Dispatchable {
    fn from(stream: ActionStream) -> Self {
        Self::Sequence(stream)
    }
}

impl<T: Into<Dispatchable>> From<Option<T>> for Dispatchable {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Empty)
    }
}

/// What [`Dispatcher::dispatch`] did with its input.
#[derive(Debug)]
pub enum Dispatched {
    /// The input was empty or not map-shaped
    Ignored,
    /// A single action was stamped and delivered
    Action(ActionId),
    /// A sequence or signal was plugged into the channel; abort to unplug
    Plugged(AbortHandle),
}

impl Dispatched {
    /// The stamped id, for single actions
    pub fn action_id(&self) -> Option<ActionId> {
        match self {
            Dispatched::Action(id) => Some(*id),
            _ => None,
        }
    }
}

struct DispatcherInner {
    listeners: Mutex<Vec<mpsc::UnboundedSender<Action>>>,
    ids: IdGenerator,
    pulse: watch::Sender<u64>,
}

/// Dispatch gateway owning one action channel.
///
/// Cloning is cheap and yields a handle to the same channel and id sequence.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Create a dispatcher with an explicit id seed
    pub fn with_config(config: &EngineConfig) -> Self {
        let (pulse, _) = watch::channel(0);
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: Mutex::new(Vec::new()),
                ids: config.id_seed.generator(),
                pulse,
            }),
        }
    }

    fn downgrade(&self) -> Weak<DispatcherInner> {
        Arc::downgrade(&self.inner)
    }

    /// Dispatch a single value, a discrete sequence or a continuous signal.
    ///
    /// Never fails: empty and non-map inputs are ignored. Sequences and
    /// signals are forwarded by a spawned task, so this must be called from
    /// within a tokio runtime when given one of those.
    pub fn dispatch(&self, value: impl Into<Dispatchable>) -> Dispatched {
        match value.into() {
            Dispatchable::Empty => Dispatched::Ignored,
            Dispatchable::Value(value) => match push_value(&self.inner, value) {
                Some(id) => Dispatched::Action(id),
                None => Dispatched::Ignored,
            },
            Dispatchable::Sequence(stream) => Dispatched::Plugged(self.plug_sequence(stream)),
            Dispatchable::Signal(signal) => Dispatched::Plugged(self.plug_signal(signal)),
        }
    }

    /// Serialize a typed action and dispatch it
    pub fn dispatch_serialized<T: Serialize + ?Sized>(
        &self,
        action: &T,
    ) -> Result<Dispatched, Error> {
        Dispatchable::serialize(action).map(|value| self.dispatch(value))
    }

    fn plug_sequence(&self, mut stream: ActionStream) -> AbortHandle {
        let dispatcher = self.downgrade();
        tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                let Some(inner) = dispatcher.upgrade() else {
                    debug!("Dispatcher dropped, unplugging sequence");
                    break;
                };
                push_value(&inner, value);
            }
        })
        .abort_handle()
    }

    fn plug_signal(&self, mut signal: watch::Receiver<Value>) -> AbortHandle {
        let dispatcher = self.downgrade();
        let mut pulse = self.inner.pulse.subscribe();
        tokio::spawn(async move {
            loop {
                let _ = pulse.borrow_and_update();
                let latest = signal.borrow_and_update().clone();
                let Some(inner) = dispatcher.upgrade() else {
                    debug!("Dispatcher dropped, unplugging signal");
                    break;
                };
                push_value(&inner, latest);
                drop(inner);

                // Re-emit on upstream change or when a new listener attaches.
                let alive = tokio::select! {
                    changed = signal.changed() => changed.is_ok(),
                    pulsed = pulse.changed() => pulsed.is_ok(),
                };
                if !alive {
                    break;
                }
            }
        })
        .abort_handle()
    }

    /// Attach a new listener to the action channel.
    ///
    /// Only actions dispatched after this call are received. Attaching a
    /// listener fires the subscription pulse so plugged signals replay
    /// their latest value.
    pub fn subscribe(&self) -> ActionReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock_listeners().push(sender);
        self.inner.pulse.send_modify(|count| *count = count.wrapping_add(1));
        ActionReceiver { receiver }
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.inner.lock_listeners();
        listeners.retain(|listener| !listener.is_closed());
        listeners.len()
    }

    /// Whether two handles share one channel
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wrap an action creator so its return value is dispatched.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use store_dispatch_core::Dispatcher;
    ///
    /// let dispatcher = Dispatcher::new();
    /// let mut listener = dispatcher.subscribe();
    /// let add = dispatcher.bind_to_dispatch(|amount: i64| json!({"type": "add", "amount": amount}));
    ///
    /// add.call(3);
    /// assert_eq!(listener.try_recv().unwrap().get("amount"), Some(&json!(3)));
    /// ```
    pub fn bind_to_dispatch<A, R, F>(&self, creator: F) -> BoundCreator<A>
    where
        A: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Into<Dispatchable> + 'static,
    {
        BoundCreator {
            creator: Arc::new(move |args| creator(args).into()),
            dispatcher: self.clone(),
        }
    }

    /// Wrap a keyed collection of action creators
    pub fn bind_all<K, A, R, F, I>(&self, creators: I) -> HashMap<K, BoundCreator<A>>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Eq + Hash,
        A: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Into<Dispatchable> + 'static,
    {
        creators
            .into_iter()
            .map(|(key, creator)| (key, self.bind_to_dispatch(creator)))
            .collect()
    }
}

impl DispatcherInner {
    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Action>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_value(inner: &DispatcherInner, value: Value) -> Option<ActionId> {
    let Some(fields) = action_fields(value) else {
        trace!("Dropping non-map action");
        return None;
    };
    // Stamped under the lock so every listener sees ids in increasing order.
    let mut listeners = inner.lock_listeners();
    let action = Action::stamp(inner.ids.next_id(), fields);
    let id = action.id();
    trace!(action_id = id, action = %action.name(), listeners = listeners.len(), "Delivering action");
    listeners.retain(|listener| listener.send(action.clone()).is_ok());
    Some(id)
}

/// A listener attached to a dispatcher's action channel
#[derive(Debug)]
pub struct ActionReceiver {
    receiver: mpsc::UnboundedReceiver<Action>,
}

impl ActionReceiver {
    /// Wait for the next action.
    ///
    /// Returns `None` once the dispatcher is gone and every buffered action
    /// has been received.
    pub async fn recv(&mut self) -> Option<Action> {
        self.receiver.recv().await
    }

    /// Take the next action if one is already buffered
    pub fn try_recv(&mut self) -> Option<Action> {
        self.receiver.try_recv().ok()
    }
}

/// An action creator whose results are routed through a dispatcher.
pub struct BoundCreator<A> {
    creator: Arc<dyn Fn(A) -> Dispatchable + Send + Sync>,
    dispatcher: Dispatcher,
}

impl<A> Clone for BoundCreator<A> {
    fn clone(&self) -> Self {
        Self {
            creator: Arc::clone(&self.creator),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<A> fmt::Debug for BoundCreator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCreator").finish_non_exhaustive()
    }
}

impl<A> BoundCreator<A> {
    /// Call the creator and dispatch what it returns
    pub fn call(&self, args: A) -> Dispatched {
        self.dispatcher.dispatch((self.creator)(args))
    }
}
