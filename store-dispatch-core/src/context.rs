//! Context scopes
//!
//! A [`Context`] bundles one dispatcher, one instance [`Scope`], one
//! middleware registry and the engine configuration. Lookups in different
//! contexts never share instances. A process-wide context is available via
//! [`Context::global`] for callers that do not need isolation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tracing::trace;

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatchable, Dispatched, Dispatcher};
use crate::instance::Instance;
use crate::middleware::{Middleware, MiddlewareLists, MiddlewareRegistry};
use crate::store::{DefinitionInner, StoreDefinition};

struct ScopeEntry {
    definition: Weak<DefinitionInner>,
    instances: HashMap<String, Arc<Instance>>,
}

/// Per-context map from store definition to its named instances.
///
/// Entries hold their definition weakly: once a definition is dropped its
/// instances are released on the next scope access.
#[derive(Default)]
pub struct Scope {
    entries: Mutex<HashMap<u64, ScopeEntry>>,
}

impl Scope {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ScopeEntry>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|id, entry| {
            let alive = entry.definition.strong_count() > 0;
            if !alive {
                trace!(definition = id, "Pruning instances of dropped definition");
            }
            alive
        });
        entries
    }

    pub(crate) fn lookup(&self, definition: &StoreDefinition, name: &str) -> Option<Arc<Instance>> {
        self.entries()
            .get(&definition.id())
            .and_then(|entry| entry.instances.get(name))
            .cloned()
    }

    /// Insert `created` unless another lookup got there first
    pub(crate) fn insert_or_get(
        &self,
        definition: &StoreDefinition,
        name: &str,
        created: Arc<Instance>,
    ) -> Arc<Instance> {
        let mut entries = self.entries();
        let entry = entries.entry(definition.id()).or_insert_with(|| ScopeEntry {
            definition: definition.downgrade(),
            instances: HashMap::new(),
        });
        Arc::clone(entry.instances.entry(name.to_string()).or_insert(created))
    }

    pub(crate) fn remove(&self, definition: &StoreDefinition, name: &str) -> bool {
        self.entries()
            .get_mut(&definition.id())
            .and_then(|entry| entry.instances.remove(name))
            .is_some()
    }

    /// Whether the definition has a live instance under `name`
    pub fn contains(&self, definition: &StoreDefinition, name: &str) -> bool {
        self.lookup(definition, name).is_some()
    }

    /// Number of instances across all definitions
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .map(|entry| entry.instances.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("instances", &self.len()).finish()
    }
}

struct ContextInner {
    dispatcher: Dispatcher,
    scope: Scope,
    middleware: MiddlewareRegistry,
    config: EngineConfig,
}

/// Isolation boundary: one dispatcher, one scope, one middleware registry.
///
/// Cloning yields a handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A fresh context with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// A fresh context built from `config`
    pub fn with_config(config: EngineConfig) -> Self {
        let dispatcher = Dispatcher::with_config(&config);
        Self::with_parts(dispatcher, MiddlewareRegistry::new(), config)
    }

    /// A fresh scope around an existing dispatcher and middleware registry
    pub fn with_parts(
        dispatcher: Dispatcher,
        middleware: MiddlewareRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                dispatcher,
                scope: Scope::default(),
                middleware,
                config,
            }),
        }
    }

    /// The process-wide context used when no context is given
    pub fn global() -> &'static Context {
        static GLOBAL: OnceLock<Context> = OnceLock::new();
        GLOBAL.get_or_init(Context::new)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.inner.middleware
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Dispatch through this context's dispatcher
    pub fn dispatch(&self, value: impl Into<Dispatchable>) -> Dispatched {
        self.inner.dispatcher.dispatch(value)
    }

    /// Register middleware for instances created from now on
    pub fn apply_middleware<I>(&self, middlewares: I)
    where
        I: IntoIterator<Item = Middleware>,
    {
        self.inner.middleware.apply(middlewares);
    }

    /// Empty every middleware list
    pub fn clear_middlewares(&self) {
        self.inner.middleware.clear();
    }

    /// Snapshot of the registered middleware
    pub fn get_middlewares(&self) -> MiddlewareLists {
        self.inner.middleware.snapshot()
    }

    /// Whether both handles are the same context
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dispatcher", &self.inner.dispatcher)
            .field("scope", &self.inner.scope)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::reducer;
    use crate::store::StoreKey;
    use serde_json::{json, Value};

    fn definition(key: impl Into<crate::store::StoreConfig>) -> StoreDefinition {
        StoreDefinition::new(key, reducer(|payload| payload.state.clone()))
    }

    #[test]
    fn test_contexts_are_isolated() {
        let store = definition("shared");
        let first = Context::new();
        let second = Context::new();

        let a = store.get_property_in(&first, &Value::Null);
        let b = store.get_property_in(&second, &Value::Null);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&store.get_property_in(&first, &Value::Null)));
        assert!(!first.dispatcher().ptr_eq(second.dispatcher()));
    }

    #[test]
    fn test_scope_tracks_instances() {
        let context = Context::new();
        let store = definition(StoreKey::new("temp").removable());

        assert!(context.scope().is_empty());
        store.get_property_in(&context, &json!({}));
        assert!(context.scope().contains(&store, "temp"));
        assert_eq!(context.scope().len(), 1);

        store.remove_property_in(&context, &json!({}));
        assert!(!context.scope().contains(&store, "temp"));
    }

    #[test]
    fn test_dropped_definition_is_pruned() {
        let context = Context::new();
        let store = definition("ephemeral");
        let signal = store.get_property_in(&context, &Value::Null);
        assert_eq!(context.scope().len(), 1);

        drop(store);
        assert_eq!(context.scope().len(), 0);
        // Handles already given out keep working.
        assert_eq!(signal.get(), Value::Null);
    }

    #[test]
    fn test_middleware_registry_is_per_context() {
        let first = Context::new();
        let second = Context::new();
        first.apply_middleware([Middleware::new().default_value(|_, _| json!("first"))]);

        assert_eq!(first.get_middlewares().default_value.len(), 1);
        assert!(second.get_middlewares().is_empty());

        first.clear_middlewares();
        assert!(first.get_middlewares().is_empty());
    }

    #[test]
    fn test_shared_registry() {
        let registry = MiddlewareRegistry::new();
        let first = Context::with_parts(Dispatcher::new(), registry.clone(), EngineConfig::default());
        let second = Context::with_parts(Dispatcher::new(), registry, EngineConfig::default());

        first.apply_middleware([Middleware::new().use_hook(|_| None)]);
        assert_eq!(second.get_middlewares().hooks.len(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Context::global().ptr_eq(Context::global()));
    }
}
