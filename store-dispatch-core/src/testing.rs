//! Test utilities for store-dispatch applications
//!
//! - [`settle`]: let every spawned driver, pipeline and forwarder run
//! - [`drain_ready`]: collect what a stream has ready without waiting
//! - [`ActionRecorder`]: capture everything a dispatcher broadcasts
//! - [`CallLog`], [`recording_reducer`], [`delayed_reducer`], [`Gate`]:
//!   reducers that record what they reduced, optionally held back
//! - Assertion macros over recorded actions, matched by `type`
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use store_dispatch_core::testing::{recording_reducer, settle, CallLog};
//! use store_dispatch_core::{Context, StoreDefinition, StoreKey};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new();
//! let log = CallLog::new();
//! let store = StoreDefinition::new(
//!     StoreKey::new("count").with_default(json!(0)),
//!     recording_reducer(log.clone(), |payload| json!(payload.state.as_i64().unwrap_or(0) + 1)),
//! );
//!
//! let signal = store.get_property_in(&context, &json!({}));
//! let _subscription = signal.subscribe();
//! context.dispatch(json!({"type": "inc"}));
//! settle().await;
//!
//! assert_eq!(log.entries(), vec![json!({"type": "inc"})]);
//! assert_eq!(signal.get(), json!(1));
//! # }
//! ```

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_stream::Stream;

use crate::action::Action;
use crate::dispatcher::{ActionReceiver, Dispatcher};
use crate::stage::{Payload, Stage, StageParams};

const SETTLE_YIELDS: usize = 64;

/// Yield to the scheduler until spawned engine tasks have caught up.
///
/// Intended for single-threaded test runtimes, where every ready task runs
/// between two yields.
pub async fn settle() {
    for _ in 0..SETTLE_YIELDS {
        tokio::task::yield_now().await;
    }
}

/// Take the next item if it is ready right now
pub fn next_ready<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    let mut cx = Context::from_waker(Waker::noop());
    match Pin::new(stream).poll_next(&mut cx) {
        Poll::Ready(item) => item,
        Poll::Pending => None,
    }
}

/// Settle, then collect every item the stream has ready
pub async fn drain_ready<S: Stream + Unpin>(stream: &mut S) -> Vec<S::Item> {
    settle().await;
    std::iter::from_fn(|| next_ready(stream)).collect()
}

/// Captures every action a dispatcher broadcasts from now on.
///
/// ```
/// use serde_json::json;
/// use store_dispatch_core::testing::ActionRecorder;
/// use store_dispatch_core::{assert_dispatched, Dispatcher};
///
/// let dispatcher = Dispatcher::new();
/// let mut recorder = ActionRecorder::new(&dispatcher);
/// dispatcher.dispatch(json!({"type": "load"}));
///
/// let actions = recorder.drain();
/// assert_dispatched!(actions, "load");
/// ```
#[derive(Debug)]
pub struct ActionRecorder {
    receiver: ActionReceiver,
}

impl ActionRecorder {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self {
            receiver: dispatcher.subscribe(),
        }
    }

    /// Every action broadcast since the last drain
    pub fn drain(&mut self) -> Vec<Action> {
        std::iter::from_fn(|| self.receiver.try_recv()).collect()
    }

    /// Names of every action broadcast since the last drain
    pub fn drain_names(&mut self) -> Vec<String> {
        self.drain()
            .iter()
            .map(|action| action.name().to_string())
            .collect()
    }

    pub fn has_dispatched(&mut self) -> bool {
        !self.drain().is_empty()
    }
}

/// Shared, clonable log of reduced actions.
///
/// Entries are the action's fields without the id.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Value>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: &Action) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Value::Object(action.fields().clone()));
    }

    pub fn entries(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Reducer factory that records each action, then applies `f`
pub fn recording_reducer<F>(
    log: CallLog,
    f: F,
) -> impl Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static
where
    F: Fn(&Payload) -> Value + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |_: &StageParams| {
        let log = log.clone();
        let f = Arc::clone(&f);
        Stage::map(move |payload: Payload| {
            log.record(&payload.action);
            f(&payload)
        })
    }
}

/// Reducer factory that waits `delay`, records the action, then applies `f`
pub fn delayed_reducer<F>(
    log: CallLog,
    delay: Duration,
    f: F,
) -> impl Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static
where
    F: Fn(&Payload) -> Value + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |_: &StageParams| {
        let log = log.clone();
        let f = Arc::clone(&f);
        Stage::then(move |payload: Payload| {
            let log = log.clone();
            let f = Arc::clone(&f);
            async move {
                tokio::time::sleep(delay).await;
                log.record(&payload.action);
                f(&payload)
            }
        })
    }
}

/// Holds reductions back until the test lets them through, one per permit.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// A closed gate
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let `count` more reductions through
    pub fn open(&self, count: usize) {
        self.permits.add_permits(count);
    }

    /// Wait for one permit and consume it
    pub async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }

    /// Reducer factory that waits at this gate, records the action, then
    /// applies `f`
    pub fn reducer<F>(
        &self,
        log: CallLog,
        f: F,
    ) -> impl Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static
    where
        F: Fn(&Payload) -> Value + Send + Sync + 'static,
    {
        let gate = self.clone();
        let f = Arc::new(f);
        move |_: &StageParams| {
            let gate = gate.clone();
            let log = log.clone();
            let f = Arc::clone(&f);
            Stage::then(move |payload: Payload| {
                let gate = gate.clone();
                let log = log.clone();
                let f = Arc::clone(&f);
                async move {
                    gate.pass().await;
                    log.record(&payload.action);
                    f(&payload)
                }
            })
        }
    }
}

/// Advance the paused clock, then let woken tasks run
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

/// Pause the runtime clock
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume the runtime clock
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Assert that an action with the given `type` was dispatched.
///
/// ```ignore
/// let actions = recorder.drain();
/// assert_dispatched!(actions, "todo/add");
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($actions:expr, $name:expr) => {
        assert!(
            $actions.iter().any(|a| a.action_type() == Some($name)),
            "Expected action `{}` to be dispatched, but got: {:?}",
            $name,
            $actions.iter().map(|a| a.to_string()).collect::<Vec<_>>()
        );
    };
}

/// Assert that no action with the given `type` was dispatched.
#[macro_export]
macro_rules! assert_not_dispatched {
    ($actions:expr, $name:expr) => {
        assert!(
            !$actions.iter().any(|a| a.action_type() == Some($name)),
            "Expected action `{}` NOT to be dispatched, but it was: {:?}",
            $name,
            $actions.iter().map(|a| a.to_string()).collect::<Vec<_>>()
        );
    };
}

/// Find the first action with the given `type`.
#[macro_export]
macro_rules! find_dispatched {
    ($actions:expr, $name:expr) => {
        $actions.iter().find(|a| a.action_type() == Some($name))
    };
}

/// Count actions with the given `type`.
#[macro_export]
macro_rules! count_dispatched {
    ($actions:expr, $name:expr) => {
        $actions
            .iter()
            .filter(|a| a.action_type() == Some($name))
            .count()
    };
}
