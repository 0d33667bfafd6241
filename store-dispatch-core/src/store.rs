//! Store definitions and lookup
//!
//! A [`StoreDefinition`] is created once and can back any number of live
//! instances: one per resolved name per [`Context`]. Looking an instance up
//! with [`StoreDefinition::get_property_in`] creates it on first access and
//! returns the same instance for the same name afterwards.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use store_dispatch_core::{reducer, Context, StoreDefinition, StoreKey};
//!
//! let counter = StoreDefinition::new(
//!     StoreKey::new("counter").with_default(json!(0)),
//!     reducer(|payload| match payload.action.action_type() {
//!         Some("increment") => json!(payload.state.as_i64().unwrap_or(0) + 1),
//!         _ => payload.state.clone(),
//!     }),
//! );
//!
//! let context = Context::new();
//! let signal = counter.get_property_in(&context, &json!({}));
//! assert_eq!(signal.get(), json!(0));
//! assert!(signal.ptr_eq(&counter.get_property_in(&context, &json!({}))));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::instance::Instance;
use crate::signal::StateSignal;
use crate::stage::{Payload, ReducerFactory, Stage, StageParams};

/// Canonical store configuration, resolved once per lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreKey {
    /// Instance name within a context
    pub name: String,
    /// Explicit default, threaded through default-value middleware
    pub default_value: Option<Value>,
    /// Whether `remove_property` may evict the instance
    pub is_removable: bool,
}

impl StoreKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn removable(mut self) -> Self {
        self.is_removable = true;
        self
    }

    /// Read a key from loosely-typed configuration.
    ///
    /// Strings and numbers become the name. Objects are read as
    /// `{name, defaultValue, isRemovable}`. Anything else, including a missing
    /// or non-scalar name, degrades to the empty name.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(fields) => Self {
                name: fields.get("name").map(name_of).unwrap_or_default(),
                default_value: fields.get("defaultValue").cloned(),
                is_removable: fields
                    .get("isRemovable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            other => Self::new(name_of(other)),
        }
    }
}

fn name_of(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    }
}

impl From<&str> for StoreKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StoreKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<Value> for StoreKey {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

/// How a definition resolves its [`StoreKey`] from props
#[derive(Clone)]
pub enum StoreConfig {
    /// Same key for every lookup
    Fixed(StoreKey),
    /// Key computed from the lookup props
    Resolve(Arc<dyn Fn(&Value) -> StoreKey + Send + Sync>),
}

impl StoreConfig {
    /// Resolve the key from props on every lookup.
    ///
    /// ```
    /// use serde_json::{json, Value};
    /// use store_dispatch_core::StoreConfig;
    ///
    /// let config = StoreConfig::dynamic(|props: &Value| {
    ///     json!({"name": props["id"], "isRemovable": true})
    /// });
    /// let key = config.resolve(&json!({"id": "row-1"}));
    /// assert_eq!(key.name, "row-1");
    /// assert!(key.is_removable);
    /// ```
    pub fn dynamic<F, K>(resolve: F) -> Self
    where
        F: Fn(&Value) -> K + Send + Sync + 'static,
        K: Into<StoreKey>,
    {
        Self::Resolve(Arc::new(move |props| resolve(props).into()))
    }

    pub fn resolve(&self, props: &Value) -> StoreKey {
        match self {
            StoreConfig::Fixed(key) => key.clone(),
            StoreConfig::Resolve(resolve) => resolve(props),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            StoreConfig::Resolve(_) => f.write_str("Resolve(..)"),
        }
    }
}

impl From<StoreKey> for StoreConfig {
    fn from(key: StoreKey) -> Self {
        Self::Fixed(key)
    }
}

impl From<&str> for StoreConfig {
    fn from(name: &str) -> Self {
        Self::Fixed(StoreKey::new(name))
    }
}

impl From<String> for StoreConfig {
    fn from(name: String) -> Self {
        Self::Fixed(StoreKey::new(name))
    }
}

impl From<Value> for StoreConfig {
    fn from(value: Value) -> Self {
        Self::Fixed(StoreKey::from_value(&value))
    }
}

static NEXT_DEFINITION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct DefinitionInner {
    id: u64,
    config: StoreConfig,
    reducer: ReducerFactory,
    dependents: BTreeMap<String, StoreDefinition>,
}

/// An immutable store definition.
///
/// Cloning is cheap; clones are the same definition and share instances.
#[derive(Clone)]
pub struct StoreDefinition {
    inner: Arc<DefinitionInner>,
}

impl StoreDefinition {
    /// A store without dependents
    pub fn new<C, F>(config: C, reducer: F) -> Self
    where
        C: Into<StoreConfig>,
        F: Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static,
    {
        Self::with_dependents(config, reducer, std::iter::empty::<(String, StoreDefinition)>())
    }

    /// A store that reads the state of other stores.
    ///
    /// Each dependent's current state is passed to the reducer under its key
    /// in [`Payload::others`].
    pub fn with_dependents<C, F, I, K>(config: C, reducer: F, dependents: I) -> Self
    where
        C: Into<StoreConfig>,
        F: Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static,
        I: IntoIterator<Item = (K, StoreDefinition)>,
        K: Into<String>,
    {
        Self {
            inner: Arc::new(DefinitionInner {
                id: NEXT_DEFINITION_ID.fetch_add(1, Ordering::Relaxed),
                config: config.into(),
                reducer: Arc::new(reducer),
                dependents: dependents
                    .into_iter()
                    .map(|(key, definition)| (key.into(), definition))
                    .collect(),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<DefinitionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn reducer(&self) -> &ReducerFactory {
        &self.inner.reducer
    }

    /// Dependent definitions by key
    pub fn dependents(&self) -> impl Iterator<Item = (&str, &StoreDefinition)> {
        self.inner
            .dependents
            .iter()
            .map(|(key, definition)| (key.as_str(), definition))
    }

    /// Resolve the key these props select
    pub fn resolve_key(&self, props: &Value) -> StoreKey {
        self.inner.config.resolve(props)
    }

    /// Look up or create the instance in the process-wide context
    pub fn get_property(&self, props: &Value) -> StateSignal {
        self.get_property_in(Context::global(), props)
    }

    /// Look up or create the instance these props select in `context`.
    ///
    /// Dependent stores are looked up in the same context with the same props.
    pub fn get_property_in(&self, context: &Context, props: &Value) -> StateSignal {
        let key = self.resolve_key(props);
        if let Some(instance) = context.scope().lookup(self, &key.name) {
            return instance.signal();
        }

        debug!(store = %key.name, "Creating store instance");
        let created = Instance::create(self, context, props, &key);
        context
            .scope()
            .insert_or_get(self, &key.name, created)
            .signal()
    }

    /// Evict the instance from the process-wide context
    pub fn remove_property(&self, props: &Value) -> bool {
        self.remove_property_in(Context::global(), props)
    }

    /// Evict the instance these props select, if its key is removable.
    ///
    /// Subscribers already attached keep observing the evicted instance; the
    /// next lookup by that name creates a fresh one. Returns whether an entry
    /// was removed.
    pub fn remove_property_in(&self, context: &Context, props: &Value) -> bool {
        let key = self.resolve_key(props);
        if !key.is_removable {
            return false;
        }
        let removed = context.scope().remove(self, &key.name);
        if removed {
            debug!(store = %key.name, "Removed store instance");
        }
        removed
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("dependents", &self.inner.dependents.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Create a store definition with dependents
pub fn create_store<C, F, I, K>(config: C, reducer: F, dependents: I) -> StoreDefinition
where
    C: Into<StoreConfig>,
    F: Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static,
    I: IntoIterator<Item = (K, StoreDefinition)>,
    K: Into<String>,
{
    StoreDefinition::with_dependents(config, reducer, dependents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Middleware;
    use crate::stage::reducer;
    use crate::testing::{drain_ready, recording_reducer, settle, CallLog, Gate};
    use serde_json::json;

    fn increment() -> impl Fn(&StageParams) -> Stage<Payload, Value> + Send + Sync + 'static {
        reducer(|payload| json!(payload.state.as_i64().unwrap_or(0) + 1))
    }

    #[test]
    fn test_store_key_from_value() {
        assert_eq!(StoreKey::from_value(&json!("test")).name, "test");
        assert_eq!(StoreKey::from_value(&json!(7)).name, "7");
        assert_eq!(StoreKey::from_value(&Value::Null).name, "");

        let key = StoreKey::from_value(&json!({
            "name": "todos",
            "defaultValue": [],
            "isRemovable": true,
        }));
        assert_eq!(key, StoreKey::new("todos").with_default(json!([])).removable());

        let nameless = StoreKey::from_value(&json!({"defaultValue": 1}));
        assert_eq!(nameless.name, "");
        assert!(!nameless.is_removable);
    }

    #[test]
    fn test_dynamic_config_uses_props() {
        let definition = StoreDefinition::new(
            StoreConfig::dynamic(|props: &Value| props["name"].as_str().unwrap_or("fallback").to_string()),
            increment(),
        );
        assert_eq!(definition.resolve_key(&json!({"name": "a"})).name, "a");
        assert_eq!(definition.resolve_key(&json!({})).name, "fallback");
    }

    #[test]
    fn test_same_name_same_instance() {
        let definition = StoreDefinition::new(
            StoreConfig::dynamic(|props: &Value| props["id"].clone()),
            increment(),
        );
        let context = Context::new();

        let a = definition.get_property_in(&context, &json!({"id": "a"}));
        let again = definition.get_property_in(&context, &json!({"id": "a"}));
        let b = definition.get_property_in(&context, &json!({"id": "b"}));

        assert!(a.ptr_eq(&again));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn test_default_resolved_through_middleware() {
        let context = Context::new();
        context.apply_middleware([Middleware::new().default_value(|name, previous| {
            json!({"store": name, "seed": previous})
        })]);

        let definition = StoreDefinition::new(StoreKey::new("test").with_default(json!(1)), increment());
        let signal = definition.get_property_in(&context, &Value::Null);
        assert_eq!(signal.get(), json!({"store": "test", "seed": 1}));

        let bare = StoreDefinition::new("bare", increment());
        let signal = bare.get_property_in(&context, &Value::Null);
        assert_eq!(signal.get(), json!({"store": "bare", "seed": null}));
    }

    #[tokio::test]
    async fn test_instance_without_subscriber_stays_idle() {
        let context = Context::new();
        let log = CallLog::new();
        let definition = StoreDefinition::new(
            StoreKey::new("idle").with_default(json!(0)),
            recording_reducer(log.clone(), |payload| json!(payload.state.as_i64().unwrap_or(0) + 1)),
        );

        let signal = definition.get_property_in(&context, &Value::Null);
        context.dispatch(json!({"type": "inc"}));
        settle().await;

        assert!(log.is_empty());
        assert_eq!(signal.get(), json!(0));
    }

    #[tokio::test]
    async fn test_reduces_in_dispatch_order() {
        let context = Context::new();
        let log = CallLog::new();
        let definition = StoreDefinition::new(
            StoreKey::new("list").with_default(json!([])),
            recording_reducer(log.clone(), |payload| {
                let mut items = payload.state.as_array().cloned().unwrap_or_default();
                items.push(payload.action.get("n").cloned().unwrap_or(Value::Null));
                Value::Array(items)
            }),
        );

        let signal = definition.get_property_in(&context, &Value::Null);
        let mut subscription = signal.subscribe();
        for n in 1..=4 {
            context.dispatch(json!({"type": "push", "n": n}));
        }
        settle().await;

        assert_eq!(signal.get(), json!([1, 2, 3, 4]));
        assert_eq!(log.len(), 4);
        assert_eq!(drain_ready(&mut subscription).await.len(), 5);
    }

    #[tokio::test]
    async fn test_slow_reducer_holds_later_actions() {
        let context = Context::new();
        let log = CallLog::new();
        let gate = Gate::new();
        let definition = StoreDefinition::new(
            "gated",
            gate.reducer(log.clone(), |payload| payload.action.get("a").cloned().unwrap_or_default()),
        );

        let signal = definition.get_property_in(&context, &Value::Null);
        let _subscription = signal.subscribe();
        for a in 1..=3 {
            context.dispatch(json!({"a": a}));
        }
        settle().await;
        assert!(log.is_empty());

        gate.open(1);
        settle().await;
        assert_eq!(log.entries(), vec![json!({"a": 1})]);
        assert_eq!(signal.get(), json!(1));

        gate.open(1);
        settle().await;
        assert_eq!(log.entries(), vec![json!({"a": 1}), json!({"a": 2})]);

        gate.open(1);
        settle().await;
        assert_eq!(log.len(), 3);
        assert_eq!(signal.get(), json!(3));
    }

    #[tokio::test]
    async fn test_dependent_state_in_payload() {
        let context = Context::new();
        let source = StoreDefinition::new(StoreKey::new("source").with_default(json!(0)), increment());
        let seen = CallLog::new();
        let dependent = StoreDefinition::with_dependents(
            "dependent",
            recording_reducer(seen.clone(), |payload| payload.other("source").cloned().unwrap_or_default()),
            [("source", source.clone())],
        );

        let signal = dependent.get_property_in(&context, &Value::Null);
        let _subscription = signal.subscribe();
        let source_signal = source.get_property_in(&context, &Value::Null);
        assert_eq!(source_signal.subscriber_count(), 1);

        context.dispatch(json!({"type": "first"}));
        settle().await;
        context.dispatch(json!({"type": "second"}));
        settle().await;

        assert_eq!(source_signal.get(), json!(2));
        assert_eq!(seen.len(), 2);
        // Sampled at pickup, so the second reduction sees at least the first increment.
        assert!(matches!(signal.get().as_i64(), Some(1 | 2)));
    }

    #[tokio::test]
    async fn test_teardown_releases_dependents() {
        let context = Context::new();
        let source = StoreDefinition::new("source", increment());
        let dependent =
            StoreDefinition::with_dependents("dependent", increment(), [("source", source.clone())]);

        let subscription = dependent.get_property_in(&context, &Value::Null).subscribe();
        let source_signal = source.get_property_in(&context, &Value::Null);
        assert_eq!(source_signal.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(source_signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_removal_requires_removable_key() {
        let context = Context::new();
        let fixed = StoreDefinition::new("fixed", increment());
        let removable = StoreDefinition::new(StoreKey::new("temp").removable(), increment());

        let before = fixed.get_property_in(&context, &Value::Null);
        assert!(!fixed.remove_property_in(&context, &Value::Null));
        assert!(before.ptr_eq(&fixed.get_property_in(&context, &Value::Null)));

        let before = removable.get_property_in(&context, &Value::Null);
        assert!(removable.remove_property_in(&context, &Value::Null));
        assert!(!removable.remove_property_in(&context, &Value::Null));
        assert!(!before.ptr_eq(&removable.get_property_in(&context, &Value::Null)));
    }

    #[tokio::test]
    async fn test_halted_pipeline_does_not_affect_others() {
        let context = Context::new();
        let broken = StoreDefinition::new("broken", |_: &StageParams| {
            let (input, _) = tokio::sync::mpsc::unbounded_channel();
            Stage::new(input, tokio_stream::empty())
        });
        let healthy = StoreDefinition::new(StoreKey::new("healthy").with_default(json!(0)), increment());

        let broken_signal = broken.get_property_in(&context, &Value::Null);
        let healthy_signal = healthy.get_property_in(&context, &Value::Null);
        let _a = broken_signal.subscribe();
        let _b = healthy_signal.subscribe();

        context.dispatch(json!({"type": "x"}));
        context.dispatch(json!({"type": "y"}));
        settle().await;

        assert_eq!(broken_signal.get(), Value::Null);
        assert_eq!(healthy_signal.get(), json!(2));
    }
}
