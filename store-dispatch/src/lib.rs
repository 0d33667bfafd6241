//! store-dispatch: reactive named stores over one ordered action stream
//!
//! Stores are declared once and instantiated per name and per context. Each
//! live instance folds dispatched actions through its middleware and
//! reducer, one action at a time, and exposes the result as a subscribable
//! state signal.
//!
//! # Example
//! ```
//! use serde_json::json;
//! use store_dispatch::prelude::*;
//! use store_dispatch::testing::settle;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new();
//! let todos = StoreDefinition::new(
//!     StoreKey::new("todos").with_default(json!([])),
//!     reducer(|payload| match payload.action.action_type() {
//!         Some("todos/add") => {
//!             let mut items = payload.state.as_array().cloned().unwrap_or_default();
//!             items.push(payload.action.get("title").cloned().unwrap_or_default());
//!             json!(items)
//!         }
//!         _ => payload.state.clone(),
//!     }),
//! );
//!
//! let mut binding = StoreBinding::builder(&context, json!({})).store("todos", todos).bind();
//! binding.dispatch(json!({"type": "todos/add", "title": "write docs"}));
//! settle().await;
//!
//! let (_, state) = binding.changed().await.unwrap();
//! assert_eq!(state, json!(["write docs"]));
//! # }
//! ```

// Re-export everything from core
pub use store_dispatch_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Actions and dispatch
    pub use store_dispatch_core::{Action, ActionId, Dispatchable, Dispatched, Dispatcher};

    // Stores
    pub use store_dispatch_core::{
        create_store, reducer, Context, Payload, Stage, StageParams, StateSignal, StoreConfig,
        StoreDefinition, StoreKey, Subscription,
    };

    // Middleware and views
    pub use store_dispatch_core::{
        decorate, ActionLogger, ActionLoggerConfig, Component, Middleware, MiddlewareSlots,
        StoreBinding,
    };

    #[cfg(feature = "tasks")]
    pub use store_dispatch_core::{TaskKey, TaskManager};

    #[cfg(feature = "sources")]
    pub use store_dispatch_core::{ActionSources, SourceKey};
}
