//! Error types for the geofence monitor.
//!
//! All errors are strongly typed using thiserror. Data-level errors (a bad
//! fence, a bad fix) are recovered locally by the caller or the engine;
//! connectivity errors abort `start()` and are left to the caller to retry.

use thiserror::Error;

/// Errors raised when a fence is rejected at registration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FenceError {
    #[error("Fence id cannot be empty")]
    EmptyId,

    #[error("Fence '{id}' has invalid radius {radius_m}m (must be finite and > 0)")]
    InvalidRadius {
        id: String,
        radius_m: f64,
    },

    #[error("Fence '{id}' has invalid center ({latitude}, {longitude})")]
    InvalidCenter {
        id: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("Required fence field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Fence registry is full ({max_fences} fences); cannot add '{id}'")]
    CapacityExceeded {
        id: String,
        max_fences: usize,
    },
}

/// Errors raised when a position fix is malformed.
///
/// A rejected fix never touches fence state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FixError {
    #[error("Fix coordinate is not finite: ({latitude}, {longitude})")]
    NonFiniteCoordinate {
        latitude: f64,
        longitude: f64,
    },

    #[error("Fix coordinate is out of range: ({latitude}, {longitude})")]
    OutOfRange {
        latitude: f64,
        longitude: f64,
    },

    #[error("Fix accuracy {accuracy_m}m is negative or not finite")]
    InvalidAccuracy {
        accuracy_m: f64,
    },
}

/// Errors raised while connecting to a position source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("Position source unavailable: {reason}")]
    Unavailable {
        reason: String,
    },

    #[error("Position source did not connect within {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Errors raised by the fence id store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fence id store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fence id store serialization error: {message}")]
    Serialization {
        message: String,
    },
}

/// The event queue was saturated and the oldest queued event was dropped.
///
/// This is informational; the monitor keeps running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Event queue full (capacity {capacity}); dropped oldest event for fence '{dropped_fence_id}'")]
pub struct OverflowWarning {
    pub dropped_fence_id: String,
    pub capacity: usize,
}

/// Top-level error type for the geofence monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid fence: {0}")]
    InvalidFence(#[from] FenceError),

    #[error("Invalid fix: {0}")]
    InvalidFix(#[from] FixError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {reason}")]
    Config {
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MonitorError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a fence validation error.
    #[must_use]
    pub const fn is_invalid_fence(&self) -> bool {
        matches!(self, Self::InvalidFence(_))
    }

    /// Returns true if this is a fix validation error.
    #[must_use]
    pub const fn is_invalid_fix(&self) -> bool {
        matches!(self, Self::InvalidFix(_))
    }

    /// Returns true if the position source could not be reached.
    #[must_use]
    pub const fn is_source_unavailable(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Returns true if this error may succeed when retried by the caller.
    ///
    /// Only source errors qualify. The monitor itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
