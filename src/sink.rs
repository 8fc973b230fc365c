//! Notification sinks.
//!
//! A sink receives every committed transition exactly once, in emission
//! order, on the dispatcher thread.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use crate::event::TransitionEvent;

/// Consumer of transition events.
pub trait NotificationSink: Send + Sync {
    /// Delivers one event. Must not block for long.
    fn deliver(&self, event: &TransitionEvent);
}

impl<F> NotificationSink for F
where
    F: Fn(&TransitionEvent) + Send + Sync,
{
    fn deliver(&self, event: &TransitionEvent) {
        self(event);
    }
}

/// Logs `entered <id>` / `exited <id>` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, event: &TransitionEvent) {
        info!(
            fence_id = %event.fence_id,
            kind = %event.kind,
            degraded = event.degraded,
            at = %event.timestamp,
            "{}",
            event.log_line()
        );
    }
}

/// Keeps delivered events in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TransitionEvent>>,
    delivered: Condvar,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the delivered events.
    #[must_use]
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of delivered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` events were delivered.
    ///
    /// Returns false on timeout.
    #[must_use]
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self
                .delivered
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl NotificationSink for CollectingSink {
    fn deliver(&self, event: &TransitionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        self.delivered.notify_all();
    }
}
