//! Per-instance hold queue
//!
//! Keeps at most one action in flight through a store's pipeline. The head of
//! the queue is the in-flight action; everything behind it waits until the
//! store's state settles.

use std::collections::VecDeque;

use crate::action::Action;

/// Whether the pipeline is free to take the next action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueStatus {
    /// At most the released head is held
    #[default]
    Ready,
    /// Actions are waiting behind the in-flight head
    OnHold,
}

/// Input to the hold queue
#[derive(Debug, Clone)]
pub enum Feed {
    /// An action arrived from the action channel
    Action(Action),
    /// The in-flight action's next state was published
    Settled,
    /// The instance lost its last subscriber
    Teardown,
}

/// FIFO of pending actions with a single in-flight head.
#[derive(Debug, Default)]
pub struct HoldQueue {
    pending: VecDeque<Action>,
    status: QueueStatus,
}

impl HoldQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one input; returns the action to release into the pipeline, if any.
    ///
    /// - an action arriving on an empty queue is released immediately
    /// - an action arriving behind others waits and puts the queue on hold
    /// - a settle drops the head and releases the next one
    /// - a teardown discards everything
    pub fn accept(&mut self, feed: Feed) -> Option<Action> {
        let released = match feed {
            Feed::Action(action) => {
                let released = self.pending.is_empty().then(|| action.clone());
                self.pending.push_back(action);
                released
            }
            Feed::Settled => {
                self.pending.pop_front();
                self.pending.front().cloned()
            }
            Feed::Teardown => {
                self.pending.clear();
                None
            }
        };
        self.status = if self.pending.len() > 1 {
            QueueStatus::OnHold
        } else {
            QueueStatus::Ready
        };
        released
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    /// Number of actions held, including the in-flight head
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The in-flight action
    pub fn head(&self) -> Option<&Action> {
        self.pending.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fields;
    use serde_json::json;

    fn action(id: u64) -> Action {
        Action::stamp(id, action_fields(json!({"type": "test"})).unwrap())
    }

    #[test]
    fn test_first_action_released_immediately() {
        let mut queue = HoldQueue::new();
        let released = queue.accept(Feed::Action(action(1)));
        assert_eq!(released.map(|a| a.id()), Some(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.status(), QueueStatus::Ready);
    }

    #[test]
    fn test_actions_wait_behind_head() {
        let mut queue = HoldQueue::new();
        queue.accept(Feed::Action(action(1)));
        assert!(queue.accept(Feed::Action(action(2))).is_none());
        assert_eq!(queue.status(), QueueStatus::OnHold);
        assert!(queue.accept(Feed::Action(action(3))).is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.head().map(Action::id), Some(1));
    }

    #[test]
    fn test_settle_releases_in_order() {
        let mut queue = HoldQueue::new();
        for id in 1..=3 {
            queue.accept(Feed::Action(action(id)));
        }

        assert_eq!(queue.accept(Feed::Settled).map(|a| a.id()), Some(2));
        assert_eq!(queue.status(), QueueStatus::OnHold);
        assert_eq!(queue.accept(Feed::Settled).map(|a| a.id()), Some(3));
        assert_eq!(queue.status(), QueueStatus::Ready);
        assert!(queue.accept(Feed::Settled).is_none());
        assert_eq!(queue.status(), QueueStatus::Ready);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_settle_on_empty_queue_is_noop() {
        let mut queue = HoldQueue::new();
        assert!(queue.accept(Feed::Settled).is_none());
        assert_eq!(queue.status(), QueueStatus::Ready);

        let released = queue.accept(Feed::Action(action(4)));
        assert_eq!(released.map(|a| a.id()), Some(4));
    }

    #[test]
    fn test_teardown_discards_pending() {
        let mut queue = HoldQueue::new();
        queue.accept(Feed::Action(action(1)));
        queue.accept(Feed::Action(action(2)));

        assert!(queue.accept(Feed::Teardown).is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.status(), QueueStatus::Ready);
    }
}
