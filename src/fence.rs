//! Fence definitions.
//!
//! A fence is a circular region with enter/exit trigger semantics. Fences are
//! immutable once registered; registering the same id again replaces the
//! previous definition.

use std::borrow::Borrow;
use std::fmt;
use std::ops::BitOr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FenceError;
use crate::geo::Coordinate;

/// Caller-chosen fence identifier (e.g. a work-site name).
///
/// # Examples
///
/// ```
/// use geofence_monitor::FenceId;
///
/// let id = FenceId::from("Job");
/// assert_eq!(id.as_str(), "Job");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FenceId(String);

impl FenceId {
    /// Wraps a string id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for FenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FenceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FenceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for FenceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Kind of boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Outside to inside.
    Enter,
    /// Inside to outside.
    Exit,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Exit => f.write_str("exit"),
        }
    }
}

/// Set of transitions a fence reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TransitionMask {
    /// Report entering the fence.
    #[serde(default)]
    pub enter: bool,
    /// Report exiting the fence.
    #[serde(default)]
    pub exit: bool,
}

impl TransitionMask {
    /// No transitions; the fence is registered but never evaluated.
    pub const NONE: Self = Self { enter: false, exit: false };
    /// Enter only.
    pub const ENTER: Self = Self { enter: true, exit: false };
    /// Exit only.
    pub const EXIT: Self = Self { enter: false, exit: true };
    /// Enter and exit.
    pub const BOTH: Self = Self { enter: true, exit: true };

    /// Returns true if the mask reports `kind`.
    #[must_use]
    pub const fn contains(self, kind: TransitionKind) -> bool {
        match kind {
            TransitionKind::Enter => self.enter,
            TransitionKind::Exit => self.exit,
        }
    }

    /// Returns true if no transition is reported.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.enter && !self.exit
    }
}

impl BitOr for TransitionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            enter: self.enter || rhs.enter,
            exit: self.exit || rhs.exit,
        }
    }
}

/// When a fence stops being monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "at", rename_all = "snake_case")]
pub enum Expiry {
    /// Monitored until explicitly removed.
    #[default]
    Never,
    /// Removed automatically once time reaches this instant.
    At(DateTime<Utc>),
}

impl Expiry {
    /// Expiry `duration` after `now`.
    #[must_use]
    pub fn after(now: DateTime<Utc>, duration: Duration) -> Self {
        Self::At(now + duration)
    }

    /// Returns true if the fence is expired at `now` (expiry at or before now).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::At(t) => *t <= now,
        }
    }
}

/// A registered circular fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fence {
    /// Unique identifier within the registry.
    pub id: FenceId,
    /// Fence center.
    pub center: Coordinate,
    /// Radius in meters (> 0).
    pub radius_m: f64,
    /// Automatic removal time.
    #[serde(default)]
    pub expiry: Expiry,
    /// Minimum dwell in milliseconds before a containment change is committed.
    #[serde(default)]
    pub responsiveness_ms: u64,
    /// Transitions to report.
    #[serde(default = "default_mask")]
    pub transitions: TransitionMask,
}

const fn default_mask() -> TransitionMask {
    TransitionMask::BOTH
}

impl Fence {
    /// Creates a never-expiring fence reporting both transitions.
    ///
    /// # Errors
    ///
    /// Returns `FenceError` if the id is blank, the radius is not > 0, or
    /// the center is out of range.
    pub fn new(
        id: impl Into<FenceId>,
        center: Coordinate,
        radius_m: f64,
        responsiveness_ms: u64,
    ) -> Result<Self, FenceError> {
        Self::builder()
            .id(id)
            .center(center)
            .radius_m(radius_m)
            .responsiveness_ms(responsiveness_ms)
            .build()
    }

    /// Creates a new fence builder.
    #[must_use]
    pub fn builder() -> FenceBuilder {
        FenceBuilder::new()
    }

    /// Checks the registration invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), FenceError> {
        if self.id.is_blank() {
            return Err(FenceError::EmptyId);
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(FenceError::InvalidRadius {
                id: self.id.to_string(),
                radius_m: self.radius_m,
            });
        }
        if !self.center.is_valid() {
            return Err(FenceError::InvalidCenter {
                id: self.id.to_string(),
                latitude: self.center.latitude,
                longitude: self.center.longitude,
            });
        }
        Ok(())
    }

    /// Returns true if the fence is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_expired_at(now)
    }

    /// Returns true if two fences have the same geometry and timing.
    ///
    /// Used to detect a replacement that must reset containment state.
    #[must_use]
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.center == other.center
            && self.radius_m == other.radius_m
            && self.responsiveness_ms == other.responsiveness_ms
            && self.transitions == other.transitions
    }
}

/// Builder for creating Fence instances.
#[derive(Debug, Default)]
pub struct FenceBuilder {
    id: Option<FenceId>,
    center: Option<Coordinate>,
    radius_m: Option<f64>,
    expiry: Expiry,
    responsiveness_ms: u64,
    transitions: Option<TransitionMask>,
}

impl FenceBuilder {
    /// Creates a new fence builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fence id.
    #[must_use]
    pub fn id(mut self, id: impl Into<FenceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the fence center.
    #[must_use]
    pub fn center(mut self, center: Coordinate) -> Self {
        self.center = Some(center);
        self
    }

    /// Sets center and radius in one call.
    #[must_use]
    pub fn circular_region(self, latitude: f64, longitude: f64, radius_m: f64) -> Self {
        self.center(Coordinate::new(latitude, longitude)).radius_m(radius_m)
    }

    /// Sets the radius in meters.
    #[must_use]
    pub fn radius_m(mut self, radius_m: f64) -> Self {
        self.radius_m = Some(radius_m);
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    /// Sets the responsiveness window in milliseconds.
    #[must_use]
    pub fn responsiveness_ms(mut self, responsiveness_ms: u64) -> Self {
        self.responsiveness_ms = responsiveness_ms;
        self
    }

    /// Sets the reported transitions (defaults to enter and exit).
    #[must_use]
    pub fn transitions(mut self, transitions: TransitionMask) -> Self {
        self.transitions = Some(transitions);
        self
    }

    /// Builds the Fence.
    ///
    /// # Errors
    ///
    /// Returns `FenceError` if required fields are missing or invalid.
    pub fn build(self) -> Result<Fence, FenceError> {
        let id = self.id.ok_or(FenceError::EmptyId)?;
        let center = self.center.ok_or(FenceError::MissingField {
            field: "center".to_string(),
        })?;
        let radius_m = self.radius_m.ok_or(FenceError::MissingField {
            field: "radius_m".to_string(),
        })?;

        let fence = Fence {
            id,
            center,
            radius_m,
            expiry: self.expiry,
            responsiveness_ms: self.responsiveness_ms,
            transitions: self.transitions.unwrap_or(TransitionMask::BOTH),
        };
        fence.validate()?;
        Ok(fence)
    }
}
