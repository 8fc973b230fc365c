//! Monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};
use crate::fence::TransitionKind;
use crate::registry::DEFAULT_MAX_FENCES;

/// Whether the first observed containment of a fence emits an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialTrigger {
    /// Seeding never emits.
    #[default]
    None,
    /// Emit `enter` when the first fix is already inside.
    Enter,
    /// Emit `exit` when the first fix is already outside.
    Exit,
    /// Both of the above.
    Both,
}

impl InitialTrigger {
    /// Returns true if seeding into the state implied by `kind` emits.
    #[must_use]
    pub const fn fires_for(self, kind: TransitionKind) -> bool {
        match (self, kind) {
            (Self::Both, _) | (Self::Enter, TransitionKind::Enter) | (Self::Exit, TransitionKind::Exit) => true,
            _ => false,
        }
    }
}

/// Configuration for the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Fixes less accurate than this (meters) are evaluated with degraded
    /// confidence.
    pub accuracy_threshold_m: f64,
    /// Max queued events awaiting the sink; the oldest is dropped on overflow.
    pub event_queue_capacity: usize,
    /// Upper bound for connecting to the position source.
    pub connect_timeout_ms: u64,
    /// Max fences in the registry.
    pub max_fences: usize,
    /// Event emitted when a fence's first containment is observed.
    pub initial_trigger: InitialTrigger,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold_m: 200.0,
            event_queue_capacity: 64,
            connect_timeout_ms: 5_000,
            max_fences: DEFAULT_MAX_FENCES,
            initial_trigger: InitialTrigger::None,
        }
    }
}

impl MonitorConfig {
    /// Parses a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` if the JSON is malformed or invalid.
    pub fn from_json_str(json: &str) -> MonitorResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| MonitorError::Config {
            reason: format!("invalid config json: {e}"),
        })?;
        cfg.validate()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` on zero capacities or a non-positive
    /// accuracy threshold.
    pub fn validate(self) -> MonitorResult<Self> {
        if !self.accuracy_threshold_m.is_finite() || self.accuracy_threshold_m <= 0.0 {
            return Err(MonitorError::Config {
                reason: format!(
                    "accuracy_threshold_m must be finite and > 0 (got {})",
                    self.accuracy_threshold_m
                ),
            });
        }
        if self.event_queue_capacity == 0 {
            return Err(MonitorError::Config {
                reason: "event_queue_capacity must be at least 1".to_string(),
            });
        }
        if self.max_fences == 0 {
            return Err(MonitorError::Config {
                reason: "max_fences must be at least 1".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(MonitorError::Config {
                reason: "connect_timeout_ms must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    /// Connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
