//! Live store instances
//!
//! An instance runs two tasks once activated:
//!
//! - the intake driver, which feeds the hold queue from the action channel
//!   and from the instance's own state changes, and releases the queue head
//!   into the pipeline
//! - the pipeline, which assembles a payload for each released action,
//!   threads it through pre-reduce stages, the reducer and post-reduce stages,
//!   and writes the next state into the state cell
//!
//! Every write into the state cell is a settle pulse for the driver. The
//! cell is only ever written by the pipeline, so the driver never observes
//! the pipeline's output as a new action.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::action::Action;
use crate::context::Context;
use crate::dispatcher::{ActionReceiver, Dispatcher};
use crate::queue::{Feed, HoldQueue};
use crate::signal::{Activate, StateCell, StateSignal, Subscription};
use crate::stage::{Payload, Stage, StageParams};
use crate::store::{StoreDefinition, StoreKey};

pub(crate) struct Instance {
    cell: Arc<StateCell>,
    dispatcher: Dispatcher,
    pipeline_tx: mpsc::UnboundedSender<Action>,
    // Parked until the first activation spawns it.
    pipeline: Mutex<Option<Pipeline>>,
    dependents: Vec<(String, StateSignal)>,
    activation: Mutex<Option<Activation>>,
}

struct Activation {
    token: CancellationToken,
    upstream: Vec<Subscription>,
}

impl Instance {
    /// Resolve the default, look up dependents and build every stage.
    pub(crate) fn create(
        definition: &StoreDefinition,
        context: &Context,
        props: &Value,
        key: &StoreKey,
    ) -> Arc<Self> {
        let seed = key.default_value.clone().unwrap_or(Value::Null);
        let initial = context.middleware().resolve_default(&key.name, seed);

        let dependents: Vec<_> = definition
            .dependents()
            .map(|(dependency, store)| {
                (dependency.to_string(), store.get_property_in(context, props))
            })
            .collect();

        let params = StageParams {
            name: key.name.clone(),
            dispatcher: context.dispatcher().clone(),
        };
        let middleware = context.middleware().snapshot();
        let (pipeline_tx, actions) = mpsc::unbounded_channel();
        let cell = Arc::new(StateCell::new(key.name.clone(), initial));

        let pipeline = Pipeline {
            cell: Arc::clone(&cell),
            dispatcher: context.dispatcher().clone(),
            dependents: dependents.clone(),
            actions,
            pre: middleware.pre_reduce.iter().map(|f| f(&params)).collect(),
            reducer: (definition.reducer())(&params),
            post: middleware.post_reduce.iter().map(|f| f(&params)).collect(),
        };

        Arc::new(Self {
            cell,
            dispatcher: context.dispatcher().clone(),
            pipeline_tx,
            pipeline: Mutex::new(Some(pipeline)),
            dependents,
            activation: Mutex::new(None),
        })
    }

    pub(crate) fn signal(self: &Arc<Self>) -> StateSignal {
        StateSignal::new(Arc::clone(&self.cell), self.clone())
    }

    fn name(&self) -> &str {
        self.cell.name()
    }
}

impl Activate for Instance {
    fn activate(&self) {
        let upstream = self
            .dependents
            .iter()
            .map(|(_, signal)| signal.subscribe())
            .collect();
        let actions = self.dispatcher.subscribe();
        let settled = self.cell.changes();
        let token = CancellationToken::new();

        let pipeline = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pipeline) = pipeline {
            tokio::spawn(pipeline.run());
        }
        tokio::spawn(drive(
            self.name().to_string(),
            token.clone(),
            actions,
            settled,
            self.pipeline_tx.clone(),
        ));
        debug!(store = %self.name(), "Store instance activated");

        let previous = self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Activation { token, upstream });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    fn deactivate(&self) {
        let activation = self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Activation { token, upstream }) = activation {
            token.cancel();
            drop(upstream);
            debug!(store = %self.name(), "Store instance deactivated");
        }
    }
}

/// Feed the hold queue until cancelled; forward every released head.
async fn drive(
    name: String,
    token: CancellationToken,
    mut actions: ActionReceiver,
    mut settled: mpsc::UnboundedReceiver<Value>,
    pipeline: mpsc::UnboundedSender<Action>,
) {
    let mut queue = HoldQueue::new();
    let release = |queue: &mut HoldQueue, feed: Feed| {
        if let Some(head) = queue.accept(feed) {
            trace!(store = %name, action = %head, "Releasing action");
            if pipeline.send(head).is_err() {
                trace!(store = %name, "Pipeline halted, action dropped");
            }
        }
    };

    loop {
        let feed = tokio::select! {
            biased;
            _ = token.cancelled() => {
                queue.accept(Feed::Teardown);
                break;
            }
            pulse = settled.recv() => match pulse {
                Some(_) => Feed::Settled,
                None => break,
            },
            action = actions.recv() => match action {
                Some(action) => {
                    trace!(store = %name, action = %action, queued = queue.len(), "Action arrived");
                    Feed::Action(action)
                }
                None => break,
            },
        };
        release(&mut queue, feed);
    }
    trace!(store = %name, discarded = queue.len(), "Intake stopped");
}

struct Pipeline {
    cell: Arc<StateCell>,
    dispatcher: Dispatcher,
    dependents: Vec<(String, StateSignal)>,
    actions: mpsc::UnboundedReceiver<Action>,
    pre: Vec<Stage<Payload, Payload>>,
    reducer: Stage<Payload, Value>,
    post: Vec<Stage<Payload, Payload>>,
}

impl Pipeline {
    async fn run(mut self) {
        while let Some(action) = self.actions.recv().await {
            let payload = Payload {
                name: self.cell.name().to_string(),
                action,
                state: self.cell.get(),
                next_state: None,
                others: self
                    .dependents
                    .iter()
                    .map(|(key, signal)| (key.clone(), signal.get()))
                    .collect(),
                dispatcher: self.dispatcher.clone(),
            };
            let action_id = payload.action.id();

            let Some(next) = self.reduce(payload).await else {
                error!(store = %self.cell.name(), action_id, "Stage output ended, store halted");
                return;
            };
            self.cell.inject(next);
        }
    }

    async fn reduce(&mut self, mut payload: Payload) -> Option<Value> {
        for stage in &mut self.pre {
            payload = run_stage(stage, payload).await?;
        }
        let next = run_stage(&mut self.reducer, payload.clone()).await?;
        payload.next_state = Some(next);
        for stage in &mut self.post {
            payload = run_stage(stage, payload).await?;
        }
        Some(payload.next_state.unwrap_or(payload.state))
    }
}

async fn run_stage<I, O>(stage: &mut Stage<I, O>, input: I) -> Option<O> {
    stage.input.send(input).ok()?;
    stage.output.next().await
}
