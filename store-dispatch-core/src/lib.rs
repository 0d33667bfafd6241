//! Core engine for store-dispatch
//!
//! A reactive state container: actions are broadcast through one
//! [`Dispatcher`] per [`Context`], and every subscribed store instance reduces
//! them one at a time into its own continuously-valued state.
//!
//! # Core Concepts
//!
//! - **Action**: a map-shaped value stamped with a unique, increasing id
//! - **Store definition**: a name resolver, a reducer and named dependents
//! - **Store instance**: the live state of a definition under one name in
//!   one context, created on first lookup and active while subscribed
//! - **Middleware**: stages spliced around every reducer, default-value
//!   resolvers, component decorators and hooks
//! - **Binding**: a component's subscription to its stores
//!
//! # Basic Example
//!
//! ```
//! use serde_json::json;
//! use store_dispatch_core::testing::settle;
//! use store_dispatch_core::{reducer, Context, StoreDefinition, StoreKey};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new();
//! let counter = StoreDefinition::new(
//!     StoreKey::new("counter").with_default(json!(0)),
//!     reducer(|payload| match payload.action.action_type() {
//!         Some("inc") => json!(payload.state.as_i64().unwrap_or(0) + 1),
//!         _ => payload.state.clone(),
//!     }),
//! );
//!
//! let signal = counter.get_property_in(&context, &json!({}));
//! let _subscription = signal.subscribe();
//!
//! context.dispatch(json!({"type": "inc"}));
//! context.dispatch(json!({"type": "inc"}));
//! settle().await;
//! assert_eq!(signal.get(), json!(2));
//! # }
//! ```
//!
//! # Ordering
//!
//! Each instance holds actions that arrive while it is still reducing and
//! releases them one at a time, in arrival order, after its state has been
//! written. A reducer always sees the state produced by the previous action.

pub mod action;
pub mod binding;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
mod instance;
pub mod logger;
pub mod middleware;
pub mod queue;
pub mod signal;
#[cfg(feature = "sources")]
pub mod sources;
pub mod stage;
pub mod store;
#[cfg(feature = "tasks")]
pub mod tasks;
pub mod testing;

// Action exports
pub use action::{Action, ActionId, IdGenerator};
pub use dispatcher::{
    ActionReceiver, ActionStream, BoundCreator, Dispatchable, Dispatched, Dispatcher,
};

// Configuration and errors
pub use config::{EngineConfig, IdSeed};
pub use error::Error;

// Store exports
pub use context::{Context, Scope};
pub use queue::{Feed, HoldQueue, QueueStatus};
pub use signal::{StateSignal, Subscription};
pub use stage::{
    reducer, Payload, PayloadStageFactory, ReducerFactory, Stage, StageOutput, StageParams,
};
pub use store::{create_store, StoreConfig, StoreDefinition, StoreKey};

// Middleware exports
pub use middleware::{
    DecoratorFn, DefaultValueFn, HookFn, Middleware, MiddlewareLists, MiddlewareRegistry,
    MiddlewareSlots,
};

// Binding exports
pub use binding::{decorate, BindingBuilder, Component, MountCallback, StoreBinding};

// Logger exports
pub use logger::{
    glob_match, ActionLog, ActionLogConfig, ActionLogEntry, ActionLogger, ActionLoggerConfig,
};

// Task exports (requires "tasks" feature)
#[cfg(feature = "tasks")]
pub use tasks::{TaskKey, TaskManager};

// Source exports (requires "sources" feature)
#[cfg(feature = "sources")]
pub use sources::{ActionSources, SourceKey};

// Testing exports
pub use testing::{ActionRecorder, CallLog, Gate};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionId};
    pub use crate::binding::{decorate, Component, StoreBinding};
    pub use crate::context::Context;
    pub use crate::dispatcher::{Dispatchable, Dispatched, Dispatcher};
    pub use crate::logger::{ActionLogger, ActionLoggerConfig};
    pub use crate::middleware::{Middleware, MiddlewareSlots};
    pub use crate::signal::{StateSignal, Subscription};
    #[cfg(feature = "sources")]
    pub use crate::sources::{ActionSources, SourceKey};
    pub use crate::stage::{reducer, Payload, Stage, StageParams};
    pub use crate::store::{create_store, StoreConfig, StoreDefinition, StoreKey};
    #[cfg(feature = "tasks")]
    pub use crate::tasks::{TaskKey, TaskManager};
}
