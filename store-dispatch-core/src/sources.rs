//! Keyed action sources
//!
//! [`ActionSources`] owns long-running producers that feed a dispatcher:
//! timers, streams and signals. Each source lives under a [`SourceKey`];
//! registering a key that is already active replaces the old source.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use serde_json::json;
//! use store_dispatch::sources::ActionSources;
//!
//! let mut sources = ActionSources::new(context.dispatcher());
//!
//! // Poll every 5 seconds
//! sources.interval("poll", Duration::from_secs(5), || json!({"type": "poll"}));
//!
//! // Forward an external stream of actions
//! sources.stream("events", event_stream);
//!
//! // Keep a signal plugged until cancelled
//! sources.signal("theme", theme_rx);
//!
//! sources.cancel(&"poll".into());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::dispatcher::{Dispatchable, Dispatched, Dispatcher};

/// Identifies an action source for cancellation and replacement.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for SourceKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Registry of keyed producers dispatching into one [`Dispatcher`].
///
/// Dropping the registry stops every source it owns.
pub struct ActionSources {
    handles: HashMap<SourceKey, AbortHandle>,
    dispatcher: Dispatcher,
}

impl ActionSources {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self {
            handles: HashMap::new(),
            dispatcher: dispatcher.clone(),
        }
    }

    /// Dispatch `f()` every `period`, starting one period from now.
    pub fn interval<F>(&mut self, key: impl Into<SourceKey>, period: Duration, f: F) -> &mut Self
    where
        F: Fn() -> Value + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                dispatcher.dispatch(f());
            }
        })
        .abort_handle();
        self.insert(key.into(), handle)
    }

    /// Dispatch `f()` now and then every `period`.
    pub fn interval_immediate<F>(
        &mut self,
        key: impl Into<SourceKey>,
        period: Duration,
        f: F,
    ) -> &mut Self
    where
        F: Fn() -> Value + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            loop {
                ticks.tick().await;
                dispatcher.dispatch(f());
            }
        })
        .abort_handle();
        self.insert(key.into(), handle)
    }

    /// Dispatch every item of `stream` until it ends or is cancelled.
    pub fn stream<S>(&mut self, key: impl Into<SourceKey>, stream: S) -> &mut Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        let plugged = self.dispatcher.dispatch(Dispatchable::stream(stream));
        self.insert_plugged(key.into(), plugged)
    }

    /// Await `future` for a stream, then dispatch its items.
    ///
    /// Useful when opening the stream itself is asynchronous, such as a
    /// connection that must be established first.
    pub fn stream_async<F, S>(&mut self, key: impl Into<SourceKey>, future: F) -> &mut Self
    where
        F: Future<Output = S> + Send + 'static,
        S: Stream<Item = Value> + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            let stream = future.await;
            tokio::pin!(stream);
            while let Some(value) = stream.next().await {
                dispatcher.dispatch(value);
            }
        })
        .abort_handle();
        self.insert(key.into(), handle)
    }

    /// Keep `signal` plugged into the dispatcher.
    ///
    /// Its latest value is dispatched now, on every change, and whenever a
    /// new listener attaches to the dispatcher.
    pub fn signal(&mut self, key: impl Into<SourceKey>, signal: watch::Receiver<Value>) -> &mut Self {
        let plugged = self.dispatcher.dispatch(signal);
        self.insert_plugged(key.into(), plugged)
    }

    fn insert_plugged(&mut self, key: SourceKey, plugged: Dispatched) -> &mut Self {
        match plugged {
            Dispatched::Plugged(handle) => self.insert(key, handle),
            _ => self,
        }
    }

    fn insert(&mut self, key: SourceKey, handle: AbortHandle) -> &mut Self {
        self.cancel(&key);
        debug!(source = %key.name(), "Action source started");
        self.handles.insert(key, handle);
        self
    }

    /// Stop the source under `key`, if any
    pub fn cancel(&mut self, key: &SourceKey) {
        if let Some(handle) = self.handles.remove(key) {
            debug!(source = %key.name(), "Action source cancelled");
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    /// Whether a source is registered under `key`.
    ///
    /// Stays true after a finite stream ends, until cancelled or replaced.
    pub fn is_active(&self, key: &SourceKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn active_keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.handles.keys()
    }
}

impl Drop for ActionSources {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for ActionSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSources")
            .field("active", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}
