//! Transition events and their user-facing renderings.
//!
//! Events are serializable so they can be logged, queued, and replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fence::{FenceId, TransitionKind};
use crate::fix::PositionFix;

/// Title used for every notification.
pub const NOTIFICATION_TITLE: &str = "Auto Time Sheet";

/// A committed boundary crossing.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub event_id: Uuid,
    pub fence_id: FenceId,
    pub kind: TransitionKind,
    /// The fix that committed the transition.
    pub fix: PositionFix,
    /// Commit time (the committing fix's timestamp).
    pub timestamp: DateTime<Utc>,
    /// The committing fix was less accurate than the configured threshold.
    #[serde(default)]
    pub degraded: bool,
}

impl TransitionEvent {
    /// Creates an event committed by `fix`.
    #[must_use]
    pub fn new(fence_id: FenceId, kind: TransitionKind, fix: PositionFix, degraded: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            fence_id,
            kind,
            timestamp: fix.timestamp,
            fix,
            degraded,
        }
    }

    /// Short log line: `entered <id>` or `exited <id>`.
    #[must_use]
    pub fn log_line(&self) -> String {
        match self.kind {
            TransitionKind::Enter => format!("entered {}", self.fence_id),
            TransitionKind::Exit => format!("exited {}", self.fence_id),
        }
    }

    /// Renders the event as a user-facing notification.
    #[must_use]
    pub fn notification(&self) -> Notification {
        Notification::for_event(self)
    }
}

/// Where tapping a notification takes the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTarget {
    /// The main view listing fences.
    MainView,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Tap target.
    pub target: NotificationTarget,
    /// Dismiss when tapped.
    pub auto_cancel: bool,
}

impl Notification {
    /// Renders the notification for `event`.
    #[must_use]
    pub fn for_event(event: &TransitionEvent) -> Self {
        let body = match event.kind {
            TransitionKind::Enter => format!("You have entered area {} !", event.fence_id),
            TransitionKind::Exit => format!("You have exited area {} !", event.fence_id),
        };
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body,
            target: NotificationTarget::MainView,
            auto_cancel: true,
        }
    }
}
