//! Processing stages
//!
//! A [`Stage`] is a paired sink and source: the engine pushes one input and
//! reads the next output, pairing them by position. Reducers produce a
//! `Stage<Payload, Value>` (the next state); pre- and post-reduce middleware
//! produce a `Stage<Payload, Payload>`.
//!
//! Stages may be synchronous ([`Stage::map`]) or asynchronous
//! ([`Stage::then`]). While an asynchronous stage is pending, the owning
//! store instance holds every later action in its queue.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::action::Action;
use crate::dispatcher::{BoundCreator, Dispatchable, Dispatched, Dispatcher};

/// Boxed output side of a stage
pub type StageOutput<O> = Pin<Box<dyn Stream<Item = O> + Send + 'static>>;

/// A paired input sink and output source.
pub struct Stage<I, O> {
    /// Where the engine pushes inputs
    pub input: mpsc::UnboundedSender<I>,
    /// Where the engine reads the output paired with each input
    pub output: StageOutput<O>,
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Assemble a stage from an existing sink and stream
    pub fn new<S>(input: mpsc::UnboundedSender<I>, output: S) -> Self
    where
        S: Stream<Item = O> + Send + 'static,
    {
        Self {
            input,
            output: Box::pin(output),
        }
    }

    /// Stage that transforms each input synchronously
    pub fn map<F>(f: F) -> Self
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        let (input, rx) = mpsc::unbounded_channel();
        Self::new(input, UnboundedReceiverStream::new(rx).map(f))
    }

    /// Stage that transforms each input asynchronously, one at a time
    pub fn then<F, Fut>(f: F) -> Self
    where
        F: FnMut(I) -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let (input, rx) = mpsc::unbounded_channel();
        Self::new(input, UnboundedReceiverStream::new(rx).then(f))
    }
}

impl<T: Send + 'static> Stage<T, T> {
    /// Stage that passes every input through unchanged
    pub fn identity() -> Self {
        Self::map(|value| value)
    }

    /// Stage that observes each input and passes it through
    pub fn inspect<F>(mut f: F) -> Self
    where
        F: FnMut(&T) + Send + 'static,
    {
        Self::map(move |value| {
            f(&value);
            value
        })
    }
}

impl<I, O> fmt::Debug for Stage<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("closed", &self.input.is_closed())
            .finish_non_exhaustive()
    }
}

/// What a stage factory learns about the instance it is built for
#[derive(Debug, Clone)]
pub struct StageParams {
    /// Resolved store name
    pub name: String,
    /// Dispatcher of the instance's context
    pub dispatcher: Dispatcher,
}

/// Builds the reduction stage of a store instance
pub type ReducerFactory = Arc<dyn Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync>;

/// Builds a pre- or post-reduce middleware stage
pub type PayloadStageFactory = Arc<dyn Fn(&StageParams) -> Stage<Payload, Payload> + Send + Sync>;

/// Build a reducer factory from a plain function of the payload.
///
/// ```
/// use serde_json::{json, Value};
/// use store_dispatch_core::{reducer, StoreDefinition};
///
/// let counter = StoreDefinition::new(
///     "counter",
///     reducer(|payload| json!(payload.state.as_i64().unwrap_or(0) + 1)),
/// );
/// # let _ = counter;
/// ```
pub fn reducer<F>(f: F) -> impl Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static
where
    F: Fn(&Payload) -> Value + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |_params: &StageParams| {
        let f = Arc::clone(&f);
        Stage::map(move |payload: Payload| f(&payload))
    }
}

/// The value threaded through the pipeline of a store instance.
///
/// Built when the pipeline picks up an action: `state` and the dependent
/// states in `others` are sampled at that moment.
#[derive(Clone)]
pub struct Payload {
    /// Resolved store name
    pub name: String,
    /// The action being reduced
    pub action: Action,
    /// State before reduction
    pub state: Value,
    /// State after reduction; `None` before the reducer runs
    pub next_state: Option<Value>,
    /// Current states of dependent stores, by dependency key
    pub others: Map<String, Value>,
    /// Dispatcher of the instance's context
    pub dispatcher: Dispatcher,
}

impl Payload {
    /// Dispatch through the instance's dispatcher
    pub fn dispatch(&self, value: impl Into<Dispatchable>) -> Dispatched {
        self.dispatcher.dispatch(value)
    }

    /// Bind an action creator to the instance's dispatcher
    pub fn bind_to_dispatch<A, R, F>(&self, creator: F) -> BoundCreator<A>
    where
        A: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Into<Dispatchable> + 'static,
    {
        self.dispatcher.bind_to_dispatch(creator)
    }

    /// Current state of a dependent store
    pub fn other(&self, key: &str) -> Option<&Value> {
        self.others.get(key)
    }

    /// Replace the next state
    pub fn with_next_state(mut self, next: Value) -> Self {
        self.next_state = Some(next);
        self
    }

    /// The payload as one JSON object.
    ///
    /// Dependent states are flattened next to `name`, `action`, `state` and
    /// `nextState`; a dependency key colliding with one of those is shadowed.
    pub fn to_value(&self) -> Value {
        let mut object = self.others.clone();
        object.insert("name".into(), Value::from(self.name.clone()));
        object.insert("action".into(), self.action.to_value());
        object.insert("state".into(), self.state.clone());
        if let Some(next) = &self.next_state {
            object.insert("nextState".into(), next.clone());
        }
        Value::Object(object)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("state", &self.state)
            .field("next_state", &self.next_state)
            .field("others", &self.others)
            .finish_non_exhaustive()
    }
}
