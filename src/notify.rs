// 🔔 Notifications - user-facing outcome of a Kanban move
//
// The transition coordinator calls exactly one of these per move that gets
// past the same-column check. Front ends decide how to show them: the TUI
// renders the newest one as a toast, the API exposes the recent list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

pub trait Notifier: Send + Sync {
    /// The deal now sits in `destination`.
    fn notify_success(&self, destination: &str);

    /// The move did not happen; `reason` is shown to the user.
    fn notify_failure(&self, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn success(destination: &str) -> Self {
        Notification {
            kind: NotificationKind::Success,
            message: format!("Deal moved to {}", destination),
            at: Utc::now(),
        }
    }

    pub fn failure(reason: &str) -> Self {
        Notification {
            kind: NotificationKind::Failure,
            message: format!("Failed to update deal status: {}", reason),
            at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == NotificationKind::Failure
    }
}

/// Bounded in-memory notifier; oldest entries fall off first.
#[derive(Debug)]
pub struct NotificationLog {
    entries: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationLog {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        NotificationLog {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, notification: Notification) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification);
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<Notification> {
        self.recent(1).into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failures(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|n| n.is_failure())
            .count()
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for NotificationLog {
    fn notify_success(&self, destination: &str) {
        tracing::info!(destination, "deal status updated");
        self.push(Notification::success(destination));
    }

    fn notify_failure(&self, reason: &str) {
        tracing::warn!(reason, "deal status update failed");
        self.push(Notification::failure(reason));
    }
}
