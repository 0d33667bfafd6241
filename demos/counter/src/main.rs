//! Counter - Minimal store-dispatch example
//!
//! - Store: `counter` folds increments and decrements
//! - Dependent: `parity` reads the counter's state on every action
//! - Sources: a timer ticks the counter a few times
//! - Tasks: a delayed reset
//! - Logger: every reduction is traced and kept in a ring buffer
//!
//! Run with `RUST_LOG=debug` to see the engine's own tracing.

use std::time::Duration;

use serde_json::{json, Value};
use store_dispatch::prelude::*;
use store_dispatch::ActionLogConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn counter() -> StoreDefinition {
    StoreDefinition::new(
        StoreKey::new("counter").with_default(json!(0)),
        reducer(|payload| {
            let count = payload.state.as_i64().unwrap_or(0);
            match payload.action.action_type() {
                Some("count/increment") => json!(count + 1),
                Some("count/decrement") => json!(count - 1),
                Some("count/reset") => json!(0),
                _ => payload.state.clone(),
            }
        }),
    )
}

fn parity(counter: &StoreDefinition) -> StoreDefinition {
    create_store(
        StoreKey::new("parity").with_default(json!("even")),
        reducer(|payload| {
            let count = payload.other("counter").and_then(Value::as_i64).unwrap_or(0);
            json!(if count % 2 == 0 { "even" } else { "odd" })
        }),
        [("counter", counter.clone())],
    )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let context = Context::new();
    let logger = ActionLogger::with_log(ActionLogConfig::new(
        32,
        ActionLoggerConfig::new(Some("count/*"), None),
    ));
    context.apply_middleware([logger.middleware()]);

    let counter = counter();
    let parity = parity(&counter);

    let mut binding = StoreBinding::builder(&context, json!({"title": "Counter"}))
        .store("count", counter)
        .store("parity", parity)
        .bind();
    info!(props = %binding.render_props(), "Mounted");

    let mut sources = ActionSources::new(binding.dispatcher());
    sources.interval_immediate("tick", Duration::from_millis(50), || {
        json!({"type": "count/increment"})
    });

    let mut tasks = TaskManager::new(binding.dispatcher());
    tasks.spawn("late-decrement", async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        json!({"type": "count/decrement"})
    });

    let stop = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            changed = binding.changed() => match changed {
                Some((key, state)) => info!(store = %key, %state, "Changed"),
                None => break,
            },
        }
    }
    sources.cancel_all();
    tasks.cancel_all();

    for entry in logger.entries() {
        info!(
            store = %entry.store,
            action = %entry.name,
            changed = ?entry.state_changed,
            elapsed = %entry.elapsed_display(),
            "Logged"
        );
    }
    info!(props = %binding.render_props(), "Final");
}
