//! Keyed async tasks whose result is dispatched
//!
//! - Spawning under a key that is already running cancels the old task
//! - Debounced spawns wait first, and restart their wait on every call
//! - A cancelled task dispatches nothing
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use serde_json::json;
//! use store_dispatch::tasks::TaskManager;
//!
//! let mut tasks = TaskManager::new(context.dispatcher());
//!
//! tasks.spawn("fetch", async {
//!     let items = api::fetch_items().await;
//!     json!({"type": "items/loaded", "items": items})
//! });
//!
//! tasks.debounce("search", Duration::from_millis(200), async move {
//!     json!({"type": "search", "query": query})
//! });
//!
//! tasks.cancel(&"fetch".into());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

use crate::dispatcher::{Dispatchable, Dispatcher};

/// Identifies a task for cancellation and replacement.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TaskKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Runs keyed futures and dispatches whatever they resolve to.
///
/// The output can be anything dispatchable: a single action, `()` or `None`
/// for nothing, or a sequence. Dropping the manager aborts every task.
pub struct TaskManager {
    tasks: HashMap<TaskKey, AbortHandle>,
    dispatcher: Dispatcher,
}

impl TaskManager {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self {
            tasks: HashMap::new(),
            dispatcher: dispatcher.clone(),
        }
    }

    /// Spawn a task, cancelling any task running under the same key.
    pub fn spawn<F, R>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = R> + Send + 'static,
        R: Into<Dispatchable> + 'static,
    {
        self.spawn_after(key.into(), None, future)
    }

    /// Spawn a task that starts after `delay`.
    ///
    /// Calling again with the same key before the delay has passed cancels
    /// the pending task and restarts the wait.
    pub fn debounce<F, R>(&mut self, key: impl Into<TaskKey>, delay: Duration, future: F) -> &mut Self
    where
        F: Future<Output = R> + Send + 'static,
        R: Into<Dispatchable> + 'static,
    {
        self.spawn_after(key.into(), Some(delay), future)
    }

    fn spawn_after<F, R>(&mut self, key: TaskKey, delay: Option<Duration>, future: F) -> &mut Self
    where
        F: Future<Output = R> + Send + 'static,
        R: Into<Dispatchable> + 'static,
    {
        self.cancel(&key);

        let dispatcher = self.dispatcher.clone();
        let name = key.name().to_string();
        let handle = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let output = future.await.into();
            debug!(task = %name, "Task finished");
            dispatcher.dispatch(output);
        })
        .abort_handle();

        self.tasks.insert(key, handle);
        self
    }

    /// Cancel a task by key; no-op when nothing runs under it
    pub fn cancel(&mut self, key: &TaskKey) {
        if let Some(handle) = self.tasks.remove(key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    /// Whether a task under `key` was spawned and has not finished or been cancelled
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn running_keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_task_key() {
        let k1 = TaskKey::new("test");
        let k2 = TaskKey::from("test");
        let k3: TaskKey = "test".into();

        assert_eq!(k1, k2);
        assert_eq!(k2, k3);
        assert_eq!(k1.name(), "test");
    }

    #[tokio::test]
    async fn test_spawn_dispatches_result() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.spawn("test", async { json!({"type": "done", "n": 42}) });

        let action = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("dispatcher closed");
        assert_eq!(action.get("n"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_spawn_cancels_previous() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = counter.clone();
        tasks.spawn("test", async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c1.fetch_add(1, Ordering::SeqCst);
            json!({"n": 1})
        });
        let c2 = counter.clone();
        tasks.spawn("test", async move {
            c2.fetch_add(10, Ordering::SeqCst);
            json!({"n": 2})
        });

        let action = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("dispatcher closed");
        assert_eq!(action.get("n"), Some(&json!(2)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_empty_result_dispatches_nothing() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.spawn("quiet", async {});
        tasks.spawn("maybe", async { None::<Value> });

        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_debounce() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.debounce("test", Duration::from_millis(50), async { json!({"n": 1}) });

        let result = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
        assert!(result.is_err());

        let action = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("dispatcher closed");
        assert_eq!(action.get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_debounce_resets() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.debounce("test", Duration::from_millis(50), async { json!({"n": 1}) });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tasks.debounce("test", Duration::from_millis(50), async { json!({"n": 2}) });

        let action = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("dispatcher closed");
        assert_eq!(action.get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_cancel() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.spawn("test", async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            json!({"n": 1})
        });
        assert!(tasks.is_running(&TaskKey::new("test")));

        tasks.cancel(&TaskKey::new("test"));
        assert!(!tasks.is_running(&TaskKey::new("test")));

        let result = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let dispatcher = Dispatcher::new();
        let mut tasks = TaskManager::new(&dispatcher);

        tasks.spawn("a", tokio::time::sleep(Duration::from_secs(10)));
        tasks.spawn("b", tokio::time::sleep(Duration::from_secs(10)));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks.running_keys().count(), 2);

        tasks.cancel_all();
        assert!(tasks.is_empty());
    }
}
