//! End-to-end behaviour of dispatch, scoping and reduction order.

use std::time::Duration;

use serde_json::{json, Value};
use store_dispatch::testing::{drain_ready, recording_reducer, settle, ActionRecorder, CallLog, Gate};
use store_dispatch::{
    assert_not_dispatched, reducer, Context, Dispatched, Middleware, StoreConfig, StoreDefinition,
    StoreKey,
};

fn counter() -> StoreDefinition {
    StoreDefinition::new(
        StoreKey::new("counter").with_default(json!(0)),
        reducer(|payload| json!(payload.state.as_i64().unwrap_or(0) + 1)),
    )
}

#[tokio::test]
async fn test_ids_are_unique_and_increasing() {
    let context = Context::new();
    let mut recorder = ActionRecorder::new(context.dispatcher());

    for n in 0..5 {
        context.dispatch(json!({"type": "step", "n": n}));
    }
    let ids: Vec<_> = recorder.drain().iter().map(|action| action.id()).collect();

    assert_eq!(ids.len(), 5);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_non_map_values_never_reach_listeners() {
    let context = Context::new();
    let mut recorder = ActionRecorder::new(context.dispatcher());

    for value in [Value::Null, json!(1), json!("text"), json!(true), json!([1, 2])] {
        assert!(matches!(context.dispatch(value), Dispatched::Ignored));
    }
    assert!(matches!(context.dispatch(()), Dispatched::Ignored));
    assert!(matches!(context.dispatch(None::<Value>), Dispatched::Ignored));

    let actions = recorder.drain();
    assert!(actions.is_empty());
    assert_not_dispatched!(actions, "text");
}

#[tokio::test]
async fn test_delayed_reduction_runs_once_per_release_in_order() {
    let context = Context::new();
    let log = CallLog::new();
    let gate = Gate::new();
    let store = StoreDefinition::new(
        StoreKey::new("slow").with_default(json!(null)),
        gate.reducer(log.clone(), |payload| {
            payload.action.get("a").cloned().unwrap_or_default()
        }),
    );
    let signal = store.get_property_in(&context, &json!({}));
    let _subscription = signal.subscribe();

    context.dispatch(json!({"a": 1}));
    context.dispatch(json!({"a": 2}));
    context.dispatch(json!({"a": 3}));
    settle().await;
    assert!(log.is_empty());

    gate.open(1);
    settle().await;
    assert_eq!(log.entries(), vec![json!({"a": 1})]);

    gate.open(1);
    settle().await;
    assert_eq!(log.entries(), vec![json!({"a": 1}), json!({"a": 2})]);

    gate.open(1);
    settle().await;
    assert_eq!(
        log.entries(),
        vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]
    );
    assert_eq!(signal.get(), json!(3));

    // Nothing left to release
    gate.open(1);
    settle().await;
    assert_eq!(log.len(), 3);
}

#[test]
fn test_scopes_hold_distinct_instances() {
    let store = counter();
    let first = Context::new();
    let second = Context::new();

    let a = store.get_property_in(&first, &json!({}));
    let b = store.get_property_in(&second, &json!({}));

    assert!(!a.ptr_eq(&b));
    assert!(a.ptr_eq(&store.get_property_in(&first, &json!({}))));
    assert!(b.ptr_eq(&store.get_property_in(&second, &json!({}))));
}

#[test]
fn test_removable_instances_are_recreated() {
    let context = Context::new();
    let row = StoreDefinition::new(
        StoreConfig::dynamic(|props: &Value| {
            StoreKey::new(format!("row-{}", props["id"])).removable()
        }),
        reducer(|payload| payload.state.clone()),
    );
    let props = json!({"id": 7});

    let original = row.get_property_in(&context, &props);
    assert_eq!(original.name(), "row-7");
    assert!(row.remove_property_in(&context, &props));
    let recreated = row.get_property_in(&context, &props);
    assert!(!original.ptr_eq(&recreated));

    let fixed = counter();
    let kept = fixed.get_property_in(&context, &props);
    assert!(!fixed.remove_property_in(&context, &props));
    assert!(kept.ptr_eq(&fixed.get_property_in(&context, &props)));
}

#[test]
fn test_default_value_chain_composes_in_order() {
    let context = Context::new();
    context.apply_middleware([
        Middleware::new().default_value(|_, value: Value| {
            json!(format!("{}-A", value.as_str().unwrap_or_default()))
        }),
        Middleware::new().default_value(|_, value: Value| {
            json!(format!("{}-B", value.as_str().unwrap_or_default()))
        }),
    ]);
    let store = StoreDefinition::new(
        StoreKey::new("label").with_default(json!("D0")),
        reducer(|payload| payload.state.clone()),
    );

    assert_eq!(store.get_property_in(&context, &json!({})).get(), json!("D0-A-B"));

    context.clear_middlewares();
    let fresh = Context::new();
    assert_eq!(store.get_property_in(&fresh, &json!({})).get(), json!("D0"));
}

#[tokio::test]
async fn test_actions_while_detached_are_not_reduced() {
    let context = Context::new();
    let log = CallLog::new();
    let store = StoreDefinition::new(
        StoreKey::new("detached").with_default(json!(0)),
        recording_reducer(log.clone(), |payload| {
            payload.action.get("a").cloned().unwrap_or_default()
        }),
    );
    let signal = store.get_property_in(&context, &json!({}));

    let subscription = signal.subscribe();
    context.dispatch(json!({"a": 1}));
    settle().await;
    drop(subscription);
    settle().await;

    context.dispatch(json!({"a": 2}));
    settle().await;

    let _subscription = signal.subscribe();
    settle().await;
    context.dispatch(json!({"a": 3}));
    settle().await;

    assert_eq!(log.entries(), vec![json!({"a": 1}), json!({"a": 3})]);
    assert_eq!(signal.get(), json!(3));
}

#[tokio::test]
async fn test_counter_emits_once_per_action() {
    let context = Context::new();
    let store = counter();
    let signal = store.get_property_in(&context, &json!({}));
    let mut subscription = signal.subscribe();

    context.dispatch(json!({"type": "inc"}));
    context.dispatch(json!({"type": "inc"}));
    context.dispatch(json!({"type": "inc"}));

    let emitted = drain_ready(&mut subscription).await;
    assert_eq!(emitted, vec![json!(0), json!(1), json!(2), json!(3)]);
    assert_eq!(signal.get(), json!(3));
}

#[tokio::test]
async fn test_detach_discards_queued_actions_but_finishes_in_flight() {
    let context = Context::new();
    let log = CallLog::new();
    let gate = Gate::new();
    let store = StoreDefinition::new(
        StoreKey::new("gated").with_default(json!(0)),
        gate.reducer(log.clone(), |payload| {
            payload.action.get("a").cloned().unwrap_or_default()
        }),
    );
    let signal = store.get_property_in(&context, &json!({}));

    let subscription = signal.subscribe();
    context.dispatch(json!({"a": 1}));
    context.dispatch(json!({"a": 2}));
    context.dispatch(json!({"a": 3}));
    settle().await;
    assert!(log.is_empty());

    drop(subscription);
    settle().await;
    let _subscription = signal.subscribe();
    settle().await;

    for _ in 0..3 {
        gate.open(1);
        settle().await;
    }

    assert_eq!(log.entries(), vec![json!({"a": 1})]);
    assert_eq!(signal.get(), json!(1));
}

#[tokio::test]
async fn test_large_bursts_are_reduced_in_full() {
    let context = Context::new();
    let store = counter();
    let signal = store.get_property_in(&context, &json!({}));
    let mut subscription = signal.subscribe();

    for _ in 0..1500 {
        context.dispatch(json!({"type": "inc"}));
    }
    let reduced = tokio::time::timeout(Duration::from_secs(5), async {
        while signal.get() != json!(1500) {
            settle().await;
        }
    })
    .await;
    assert!(reduced.is_ok(), "stopped at {}", signal.get());

    let emitted = drain_ready(&mut subscription).await;
    assert_eq!(emitted.len(), 1501);
    assert_eq!(emitted.first(), Some(&json!(0)));
    assert_eq!(emitted.last(), Some(&json!(1500)));
}
