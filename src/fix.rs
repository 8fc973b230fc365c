//! Position fixes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FixError;
use crate::geo::Coordinate;

/// A single timestamped position observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Observed position.
    #[serde(flatten)]
    pub position: Coordinate,
    /// Accuracy radius in meters (68% confidence).
    pub accuracy_m: f64,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    /// Creates a fix.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position: Coordinate::new(latitude, longitude),
            accuracy_m,
            timestamp,
        }
    }

    /// Creates a fix at `position`.
    #[must_use]
    pub const fn at(position: Coordinate, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            accuracy_m,
            timestamp,
        }
    }

    /// Checks that the fix can be evaluated.
    ///
    /// # Errors
    ///
    /// Returns `FixError` for non-finite or out-of-range coordinates and for
    /// negative or non-finite accuracy.
    pub fn validate(&self) -> Result<(), FixError> {
        let Coordinate { latitude, longitude } = self.position;
        if !self.position.is_finite() {
            return Err(FixError::NonFiniteCoordinate { latitude, longitude });
        }
        if !self.position.is_valid() {
            return Err(FixError::OutOfRange { latitude, longitude });
        }
        if !self.accuracy_m.is_finite() || self.accuracy_m < 0.0 {
            return Err(FixError::InvalidAccuracy {
                accuracy_m: self.accuracy_m,
            });
        }
        Ok(())
    }
}
