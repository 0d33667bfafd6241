//! Middleware registry
//!
//! A [`Middleware`] fills any subset of five slots. Registering it with a
//! [`MiddlewareRegistry`] appends each filled slot to that slot's list;
//! registration order is execution order and lists only grow until cleared.
//!
//! Pre- and post-reduce stages are built once per store instance, when the
//! instance is created. Middleware registered later only affects instances
//! created later.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bitflags::bitflags;
use serde_json::{Map, Value};
use tracing::debug;

use crate::binding::Component;
use crate::stage::{Payload, PayloadStageFactory, Stage, StageParams};

/// Maps `(store name, previous default)` to the next default
pub type DefaultValueFn = Arc<dyn Fn(&str, Value) -> Value + Send + Sync>;

/// Wraps a component in another component
pub type DecoratorFn = Arc<dyn Fn(Component) -> Component + Send + Sync>;

/// Runs once per bound component with its props; returned entries are merged
/// into the component's props
pub type HookFn = Arc<dyn Fn(&Value) -> Option<Map<String, Value>> + Send + Sync>;

bitflags! {
    /// Which slots a middleware fills
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MiddlewareSlots: u8 {
        /// Stage run before the reducer
        const PRE_REDUCE = 1 << 0;
        /// Stage run after the reducer, seeing `next_state`
        const POST_REDUCE = 1 << 1;
        /// Default state transform
        const DEFAULT_VALUE = 1 << 2;
        /// Component decorator
        const DECORATOR = 1 << 3;
        /// Component hook
        const HOOK = 1 << 4;
    }
}

/// A bundle of optional extension points.
///
/// ```
/// use serde_json::Value;
/// use store_dispatch_core::{Middleware, MiddlewareSlots};
///
/// let middleware = Middleware::new()
///     .default_value(|_name, previous: Value| previous)
///     .use_hook(|_props| None);
/// assert_eq!(middleware.slots(), MiddlewareSlots::DEFAULT_VALUE | MiddlewareSlots::HOOK);
/// ```
#[derive(Clone, Default)]
pub struct Middleware {
    pre_reduce: Option<PayloadStageFactory>,
    post_reduce: Option<PayloadStageFactory>,
    default_value: Option<DefaultValueFn>,
    decorate_component: Option<DecoratorFn>,
    use_hook: Option<HookFn>,
}

impl Middleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the pre-reduce slot with a stage factory
    pub fn pre_reduce<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StageParams) -> Stage<Payload, Payload> + Send + Sync + 'static,
    {
        self.pre_reduce = Some(Arc::new(factory));
        self
    }

    /// Fill the post-reduce slot with a stage factory
    pub fn post_reduce<F>(mut self, factory: F) -> Self
    where
        F: Fn(&StageParams) -> Stage<Payload, Payload> + Send + Sync + 'static,
    {
        self.post_reduce = Some(Arc::new(factory));
        self
    }

    /// Fill the default-value slot
    pub fn default_value<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Value) -> Value + Send + Sync + 'static,
    {
        self.default_value = Some(Arc::new(f));
        self
    }

    /// Fill the component decorator slot
    pub fn decorate_component<F>(mut self, f: F) -> Self
    where
        F: Fn(Component) -> Component + Send + Sync + 'static,
    {
        self.decorate_component = Some(Arc::new(f));
        self
    }

    /// Fill the component hook slot
    pub fn use_hook<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        self.use_hook = Some(Arc::new(f));
        self
    }

    /// Slots this middleware fills
    pub fn slots(&self) -> MiddlewareSlots {
        let mut slots = MiddlewareSlots::empty();
        slots.set(MiddlewareSlots::PRE_REDUCE, self.pre_reduce.is_some());
        slots.set(MiddlewareSlots::POST_REDUCE, self.post_reduce.is_some());
        slots.set(MiddlewareSlots::DEFAULT_VALUE, self.default_value.is_some());
        slots.set(MiddlewareSlots::DECORATOR, self.decorate_component.is_some());
        slots.set(MiddlewareSlots::HOOK, self.use_hook.is_some());
        slots
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("slots", &self.slots())
            .finish()
    }
}

/// The five ordered slot lists.
#[derive(Clone, Default)]
pub struct MiddlewareLists {
    pub pre_reduce: Vec<PayloadStageFactory>,
    pub post_reduce: Vec<PayloadStageFactory>,
    pub default_value: Vec<DefaultValueFn>,
    pub decorators: Vec<DecoratorFn>,
    pub hooks: Vec<HookFn>,
}

impl MiddlewareLists {
    /// Entries per slot, in slot order
    pub fn counts(&self) -> [usize; 5] {
        [
            self.pre_reduce.len(),
            self.post_reduce.len(),
            self.default_value.len(),
            self.decorators.len(),
            self.hooks.len(),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.counts().iter().all(|count| *count == 0)
    }
}

impl fmt::Debug for MiddlewareLists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareLists")
            .field("pre_reduce", &self.pre_reduce.len())
            .field("post_reduce", &self.post_reduce.len())
            .field("default_value", &self.default_value.len())
            .field("decorators", &self.decorators.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Shared, appendable middleware lists.
///
/// Cloning yields a handle to the same lists. Each [`Context`](crate::Context)
/// owns one; contexts never share lists unless built from the same registry.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    lists: Arc<RwLock<MiddlewareLists>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every filled slot of each middleware, in order
    pub fn apply<I>(&self, middlewares: I)
    where
        I: IntoIterator<Item = Middleware>,
    {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        for middleware in middlewares {
            debug!(slots = ?middleware.slots(), "Registering middleware");
            lists.pre_reduce.extend(middleware.pre_reduce);
            lists.post_reduce.extend(middleware.post_reduce);
            lists.default_value.extend(middleware.default_value);
            lists.decorators.extend(middleware.decorate_component);
            lists.hooks.extend(middleware.use_hook);
        }
    }

    /// Empty all five lists
    pub fn clear(&self) {
        *self.lists.write().unwrap_or_else(PoisonError::into_inner) = MiddlewareLists::default();
    }

    /// Copy of the current lists; later registrations do not affect it
    pub fn snapshot(&self) -> MiddlewareLists {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Thread `seed` through every default-value middleware, in order
    pub fn resolve_default(&self, name: &str, seed: Value) -> Value {
        self.snapshot()
            .default_value
            .iter()
            .fold(seed, |previous, f| f(name, previous))
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MiddlewareRegistry")
            .field(&self.snapshot())
            .finish()
    }
}
