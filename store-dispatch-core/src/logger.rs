//! Action logging middleware with pattern-based filtering
//!
//! [`ActionLogger`] produces a [`Middleware`] whose pre-reduce stage logs each
//! action a store picks up and whose post-reduce stage records whether the
//! reduction changed the state. Output goes to `tracing` and, optionally, to
//! an in-memory [`ActionLog`] ring buffer.
//!
//! # Example
//!
//! ```
//! use store_dispatch_core::{ActionLogConfig, ActionLogger, ActionLoggerConfig, Context};
//!
//! let context = Context::new();
//! let logger = ActionLogger::with_log(ActionLogConfig::new(
//!     50,
//!     ActionLoggerConfig::new(None, Some("tick,mouse*")),
//! ));
//! context.apply_middleware([logger.middleware()]);
//!
//! // Later, inspect what was reduced
//! for entry in logger.recent(10) {
//!     println!("{} {} {:?}", entry.store, entry.name, entry.state_changed);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::action::{Action, ActionId};
use crate::middleware::Middleware;
use crate::stage::{Payload, Stage};

/// Which action types get logged, by glob pattern.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// Untyped actions are matched by the name `<untyped>`.
#[derive(Debug, Clone, Default)]
pub struct ActionLoggerConfig {
    /// If non-empty, only log actions matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude actions matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl ActionLoggerConfig {
    /// Create a config from comma-separated pattern strings
    ///
    /// ```
    /// use store_dispatch_core::ActionLoggerConfig;
    ///
    /// let config = ActionLoggerConfig::new(Some("todo/*,load"), Some("todo/hover"));
    /// assert!(config.should_log("todo/add"));
    /// assert!(config.should_log("load"));
    /// assert!(!config.should_log("todo/hover"));
    /// assert!(!config.should_log("save"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: split_patterns(include),
            exclude_patterns: split_patterns(exclude),
        }
    }

    /// Create a config with specific pattern vectors
    pub fn with_patterns(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include_patterns: include,
            exclude_patterns: exclude,
        }
    }

    /// Check if an action type should be logged
    pub fn should_log(&self, name: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| glob_match(p, name))
        {
            return false;
        }
        !self.exclude_patterns.iter().any(|p| glob_match(p, name))
    }
}

fn split_patterns(patterns: Option<&str>) -> Vec<String> {
    patterns
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// One reduction seen by the logger
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    /// Store that picked the action up
    pub store: String,
    pub action_id: ActionId,
    /// Action type, or `<untyped>`
    pub name: String,
    /// The full action as compact JSON
    pub summary: String,
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Whether the reduction changed the state; `None` until it completes
    pub state_changed: Option<bool>,
}

impl ActionLogEntry {
    fn new(store: &str, action: &Action, sequence: u64) -> Self {
        Self {
            store: store.to_string(),
            action_id: action.id(),
            name: action.name().to_string(),
            summary: action.to_value().to_string(),
            timestamp: Instant::now(),
            sequence,
            state_changed: None,
        }
    }

    /// Time since this action was logged
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Format the elapsed time for display (e.g., "2.3s", "150ms")
    pub fn elapsed_display(&self) -> String {
        let elapsed = self.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.1}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}

/// Configuration for the action log ring buffer
#[derive(Debug, Clone)]
pub struct ActionLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    pub filter: ActionLoggerConfig,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: ActionLoggerConfig::default(),
        }
    }
}

impl ActionLogConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn new(capacity: usize, filter: ActionLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer of recent reductions.
///
/// Older entries are discarded once capacity is reached.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(ActionLogConfig::default().capacity)
    }
}

impl ActionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Record an action picked up by `store`
    pub fn log(&mut self, store: &str, action: &Action) -> &ActionLogEntry {
        let entry = ActionLogEntry::new(store, action, self.next_sequence);
        self.next_sequence += 1;

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Record the outcome of `store` reducing the action with `action_id`
    pub fn update_state_changed(&mut self, store: &str, action_id: ActionId, changed: bool) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.action_id == action_id && entry.store == store)
        {
            entry.state_changed = Some(changed);
        }
    }

    /// All entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// The most recent N entries, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Builds logging middleware and keeps the shared log it writes to.
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct ActionLogger {
    filter: ActionLoggerConfig,
    log: Option<Arc<Mutex<ActionLog>>>,
    active: bool,
}

impl ActionLogger {
    /// Tracing only, no in-memory storage
    pub fn new(filter: ActionLoggerConfig) -> Self {
        Self {
            filter,
            log: None,
            active: true,
        }
    }

    /// Tracing plus an in-memory ring buffer
    pub fn with_log(config: ActionLogConfig) -> Self {
        Self {
            filter: config.filter,
            log: Some(Arc::new(Mutex::new(ActionLog::new(config.capacity)))),
            active: true,
        }
    }

    /// Log every action, tracing only
    pub fn log_all() -> Self {
        Self::new(ActionLoggerConfig::default())
    }

    /// When inactive the produced middleware fills no slots.
    ///
    /// ```ignore
    /// let logger = ActionLogger::log_all().active(args.debug);
    /// ```
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &ActionLoggerConfig {
        &self.filter
    }

    /// Copy of the stored entries, oldest first
    pub fn entries(&self) -> Vec<ActionLogEntry> {
        self.lock_log()
            .map(|log| log.entries().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy of the most recent N entries, newest first
    pub fn recent(&self, count: usize) -> Vec<ActionLogEntry> {
        self.lock_log()
            .map(|log| log.recent(count).cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Some(mut log) = self.lock_log() {
            log.clear();
        }
    }

    fn lock_log(&self) -> Option<MutexGuard<'_, ActionLog>> {
        self.log
            .as_ref()
            .map(|log| log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Middleware observing every reduction of every store created after
    /// it is applied
    pub fn middleware(&self) -> Middleware {
        if !self.active {
            return Middleware::new();
        }

        let before = self.clone();
        let after = self.clone();
        Middleware::new()
            .pre_reduce(move |_| {
                let logger = before.clone();
                Stage::inspect(move |payload: &Payload| logger.before(payload))
            })
            .post_reduce(move |_| {
                let logger = after.clone();
                Stage::inspect(move |payload: &Payload| logger.after(payload))
            })
    }

    fn before(&self, payload: &Payload) {
        let name = payload.action.name();
        if !self.filter.should_log(name) {
            return;
        }
        debug!(
            store = %payload.name,
            action = %name,
            action_id = payload.action.id(),
            "Reducing action"
        );
        if let Some(mut log) = self.lock_log() {
            log.log(&payload.name, &payload.action);
        }
    }

    fn after(&self, payload: &Payload) {
        let name = payload.action.name();
        if !self.filter.should_log(name) {
            return;
        }
        let changed = payload
            .next_state
            .as_ref()
            .is_some_and(|next| *next != payload.state);
        debug!(
            store = %payload.name,
            action = %name,
            action_id = payload.action.id(),
            state_changed = changed,
            "Action reduced"
        );
        if let Some(mut log) = self.lock_log() {
            log.update_state_changed(&payload.name, payload.action.id(), changed);
        }
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }

    pi == pattern.len()
}
