//! Headless view binding
//!
//! A [`StoreBinding`] is what a view layer holds for one mounted component:
//! a live subscription to each of the component's stores, the combined
//! latest state, and the output of the registered hooks. Dropping the
//! binding unsubscribes and evicts removable instances.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use store_dispatch_core::{reducer, Context, StoreBinding, StoreDefinition, StoreKey};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new();
//! let todos = StoreDefinition::new(
//!     StoreKey::new("todos").with_default(json!([])),
//!     reducer(|payload| payload.state.clone()),
//! );
//!
//! let binding = StoreBinding::builder(&context, json!({"title": "Inbox"}))
//!     .store("todos", todos)
//!     .bind();
//!
//! assert_eq!(binding.state()["todos"], json!([]));
//! assert_eq!(binding.render_props()["title"], json!("Inbox"));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, trace};

use crate::context::Context;
use crate::dispatcher::{Dispatchable, Dispatched, Dispatcher};
use crate::signal::Subscription;
use crate::store::StoreDefinition;

/// A component: a function from props to rendered output
pub type Component = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Called once after binding with `{props, ...state}`; the result is dispatched
pub type MountCallback = Arc<dyn Fn(&Value) -> Dispatchable + Send + Sync>;

/// Wrap `component` in every registered decorator, in registration order
pub fn decorate(context: &Context, component: Component) -> Component {
    context
        .middleware()
        .snapshot()
        .decorators
        .iter()
        .fold(component, |component, decorator| decorator(component))
}

/// Collects the stores and callbacks of a binding
pub struct BindingBuilder {
    context: Context,
    props: Value,
    stores: Vec<(String, StoreDefinition)>,
    callbacks: Vec<MountCallback>,
}

impl BindingBuilder {
    /// Subscribe to `store`; its state appears under `key`
    pub fn store(mut self, key: impl Into<String>, store: StoreDefinition) -> Self {
        self.stores.push((key.into(), store));
        self
    }

    /// Dispatch what `callback` returns once the binding is established
    pub fn on_mount<F, R>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: Into<Dispatchable> + 'static,
    {
        self.callbacks
            .push(Arc::new(move |data: &Value| callback(data).into()));
        self
    }

    /// Subscribe to every store, run hooks and mount callbacks
    pub fn bind(self) -> StoreBinding {
        let mut updates = StreamMap::new();
        let mut state = Map::new();
        for (key, store) in &self.stores {
            let mut subscription = store.get_property_in(&self.context, &self.props).subscribe();
            let initial = subscription
                .take_initial()
                .unwrap_or_else(|| subscription.get());
            state.insert(key.clone(), initial);
            updates.insert(key.clone(), subscription);
        }

        let hooks = self
            .context
            .middleware()
            .snapshot()
            .hooks
            .iter()
            .filter_map(|hook| hook(&self.props))
            .fold(Map::new(), |mut merged, entries| {
                merged.extend(entries);
                merged
            });

        let binding = StoreBinding {
            context: self.context,
            props: self.props,
            stores: self.stores,
            updates,
            state,
            hooks,
        };

        if !self.callbacks.is_empty() {
            let mut data = binding.state.clone();
            data.insert("props".into(), binding.props.clone());
            let data = Value::Object(data);
            for callback in &self.callbacks {
                binding.dispatch(callback(&data));
            }
        }
        debug!(stores = binding.stores.len(), "Bound component");
        binding
    }
}

/// A component's live view of its stores.
pub struct StoreBinding {
    context: Context,
    props: Value,
    stores: Vec<(String, StoreDefinition)>,
    updates: StreamMap<String, Subscription>,
    state: Map<String, Value>,
    hooks: Map<String, Value>,
}

impl StoreBinding {
    /// Start binding a component with `props` in `context`
    pub fn builder(context: &Context, props: Value) -> BindingBuilder {
        BindingBuilder {
            context: context.clone(),
            props,
            stores: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Latest state of every bound store, by key
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Entries returned by the registered hooks
    pub fn hooks(&self) -> &Map<String, Value> {
        &self.hooks
    }

    pub fn props(&self) -> &Value {
        &self.props
    }

    /// Props as a component sees them: the bound props, then hook entries,
    /// then store states, later entries shadowing earlier ones
    pub fn render_props(&self) -> Value {
        let mut merged = match &self.props {
            Value::Object(props) => props.clone(),
            _ => Map::new(),
        };
        merged.extend(self.hooks.clone());
        merged.extend(self.state.clone());
        Value::Object(merged)
    }

    /// Render `component` with the current props
    pub fn render(&self, component: &Component) -> Value {
        component(&self.render_props())
    }

    /// Wait for the next state change of any bound store.
    ///
    /// Writes that leave a store's state equal to the one already held are
    /// skipped. Returns the key and new state, or `None` once no store is
    /// bound.
    pub async fn changed(&mut self) -> Option<(String, Value)> {
        loop {
            let (key, value) = self.updates.next().await?;
            if self.state.get(&key) == Some(&value) {
                trace!(store = %key, "Bound state unchanged, skipped");
                continue;
            }
            trace!(store = %key, "Bound state changed");
            self.state.insert(key.clone(), value.clone());
            return Some((key, value));
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.context.dispatcher()
    }

    pub fn dispatch(&self, value: impl Into<Dispatchable>) -> Dispatched {
        self.context.dispatch(value)
    }
}

impl Drop for StoreBinding {
    fn drop(&mut self) {
        drop(std::mem::replace(&mut self.updates, StreamMap::new()));
        for (_, store) in &self.stores {
            store.remove_property_in(&self.context, &self.props);
        }
        debug!(stores = self.stores.len(), "Unbound component");
    }
}

impl fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBinding")
            .field("props", &self.props)
            .field("state", &self.state)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
