//! Transition engine.
//!
//! The engine consumes position fixes one at a time, maintains per-fence
//! containment state, and emits debounced enter/exit events. Callers must
//! serialize `process` calls; the coordinator does so with a single mutex.
//!
//! Per fence the state machine is:
//!
//! ```text
//! Unknown --first fix--> Inside | Outside      (seed, no event unless InitialTrigger)
//! Inside <--debounced flip--> Outside          (event if the mask allows it)
//! any --unregister/expire--> removed
//! ```
//!
//! A containment change is only committed after it has persisted for the
//! fence's responsiveness window, measured on fix timestamps. A fix that
//! returns to the committed containment first cancels the pending flip.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{InitialTrigger, MonitorConfig};
use crate::error::FixError;
use crate::event::TransitionEvent;
use crate::fence::{Fence, FenceId, TransitionKind};
use crate::fix::PositionFix;
use crate::registry::FenceRegistry;

/// Containment of the monitored position relative to one fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Containment {
    /// Inside radius + accuracy.
    Inside,
    /// Outside radius + accuracy.
    Outside,
    /// No fix evaluated yet.
    Unknown,
}

impl Containment {
    const fn transition(self) -> Option<TransitionKind> {
        match self {
            Self::Inside => Some(TransitionKind::Enter),
            Self::Outside => Some(TransitionKind::Exit),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingFlip {
    target: Containment,
    since: DateTime<Utc>,
}

/// Mutable per-fence record owned by the engine.
#[derive(Debug, Clone)]
pub struct FenceState {
    containment: Containment,
    entered_at: Option<DateTime<Utc>>,
    pending: Option<PendingFlip>,
    // Geometry the state was computed against; a replacement resets it.
    fence: Fence,
}

impl FenceState {
    fn new(fence: Fence) -> Self {
        Self {
            containment: Containment::Unknown,
            entered_at: None,
            pending: None,
            fence,
        }
    }

    /// Committed containment.
    #[must_use]
    pub const fn containment(&self) -> Containment {
        self.containment
    }

    /// When the committed containment was entered.
    #[must_use]
    pub const fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    /// Start of the pending flip, if one is being debounced.
    #[must_use]
    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        self.pending.map(|p| p.since)
    }

    /// Applies one raw containment observation.
    ///
    /// Returns the transition to report, before mask filtering.
    fn observe(
        &mut self,
        raw: Containment,
        now: DateTime<Utc>,
        responsiveness_ms: u64,
        initial: InitialTrigger,
    ) -> Option<TransitionKind> {
        if self.containment == Containment::Unknown {
            self.containment = raw;
            self.entered_at = Some(now);
            self.pending = None;
            return raw.transition().filter(|kind| initial.fires_for(*kind));
        }

        if self.containment == raw {
            if self.pending.take().is_some() {
                debug!(fence_id = %self.fence.id, containment = ?raw, "pending transition cancelled");
            }
            return None;
        }

        let since = match self.pending {
            Some(p) if p.target == raw => p.since,
            _ => {
                self.pending = Some(PendingFlip { target: raw, since: now });
                now
            }
        };

        let window = i64::try_from(responsiveness_ms).unwrap_or(i64::MAX);
        if (now - since).num_milliseconds() < window {
            return None;
        }

        self.containment = raw;
        self.entered_at = Some(now);
        self.pending = None;
        raw.transition()
    }
}

/// Result of processing one well-formed fix.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// The fix was evaluated against every active fence.
    Evaluated {
        /// Committed transitions, ordered by fence id.
        events: Vec<TransitionEvent>,
        /// Ids removed by expiry before evaluation.
        expired: Vec<FenceId>,
        /// The fix exceeded the accuracy threshold.
        degraded: bool,
    },
    /// The fix was older than the last accepted fix and was discarded.
    Stale {
        /// Timestamp of the last accepted fix.
        last_accepted: DateTime<Utc>,
    },
}

impl FixOutcome {
    /// Events emitted by this fix (empty for stale fixes).
    #[must_use]
    pub fn events(&self) -> &[TransitionEvent] {
        match self {
            Self::Evaluated { events, .. } => events,
            Self::Stale { .. } => &[],
        }
    }

    /// Consumes the outcome, returning its events.
    #[must_use]
    pub fn into_events(self) -> Vec<TransitionEvent> {
        match self {
            Self::Evaluated { events, .. } => events,
            Self::Stale { .. } => Vec::new(),
        }
    }
}

/// Containment and debounce engine.
#[derive(Debug)]
pub struct TransitionEngine {
    states: HashMap<FenceId, FenceState>,
    last_accepted: Option<DateTime<Utc>>,
    accuracy_threshold_m: f64,
    initial_trigger: InitialTrigger,
}

impl Default for TransitionEngine {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

impl TransitionEngine {
    /// Creates an engine using the accuracy and initial-trigger settings of `cfg`.
    #[must_use]
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            states: HashMap::new(),
            last_accepted: None,
            accuracy_threshold_m: cfg.accuracy_threshold_m,
            initial_trigger: cfg.initial_trigger,
        }
    }

    /// Processes one fix against the registry.
    ///
    /// # Errors
    ///
    /// Returns `FixError` for malformed fixes; no state is touched and the
    /// engine remains usable.
    pub fn process(&mut self, fix: &PositionFix, registry: &FenceRegistry) -> Result<FixOutcome, FixError> {
        if let Err(err) = fix.validate() {
            warn!(error = %err, "rejected position fix");
            return Err(err);
        }

        if let Some(last_accepted) = self.last_accepted {
            if fix.timestamp < last_accepted {
                debug!(
                    fix_at = %fix.timestamp,
                    last_accepted = %last_accepted,
                    "discarding out-of-order fix"
                );
                return Ok(FixOutcome::Stale { last_accepted });
            }
        }
        self.last_accepted = Some(fix.timestamp);

        let expired = registry.expire(fix.timestamp);
        for id in &expired {
            self.states.remove(id);
            debug!(fence_id = %id, "fence expired");
        }

        let mut fences: Vec<Fence> = registry.list().into_iter().collect();
        fences.sort_by(|a, b| a.id.cmp(&b.id));

        // Unregistered between fixes: forget their state.
        let live: HashSet<&FenceId> = fences.iter().map(|f| &f.id).collect();
        self.states.retain(|id, _| live.contains(id));

        let degraded = fix.accuracy_m > self.accuracy_threshold_m;
        if degraded {
            debug!(
                accuracy_m = fix.accuracy_m,
                threshold_m = self.accuracy_threshold_m,
                "evaluating low-accuracy fix with widened fences"
            );
        }

        let mut events = Vec::new();
        for fence in fences {
            if fence.transitions.is_empty() {
                self.states.remove(&fence.id);
                continue;
            }

            let distance_m = fix.position.distance_to(&fence.center);
            let raw = if distance_m <= fence.radius_m + fix.accuracy_m {
                Containment::Inside
            } else {
                Containment::Outside
            };

            let state = self
                .states
                .entry(fence.id.clone())
                .or_insert_with(|| FenceState::new(fence.clone()));
            if !state.fence.same_geometry(&fence) {
                debug!(fence_id = %fence.id, "fence replaced; resetting containment");
                *state = FenceState::new(fence.clone());
            }

            let Some(kind) = state.observe(raw, fix.timestamp, fence.responsiveness_ms, self.initial_trigger) else {
                continue;
            };
            if !fence.transitions.contains(kind) {
                debug!(fence_id = %fence.id, %kind, "transition masked");
                continue;
            }

            debug!(fence_id = %fence.id, %kind, distance_m, "transition committed");
            events.push(TransitionEvent::new(fence.id, kind, *fix, degraded));
        }

        Ok(FixOutcome::Evaluated {
            events,
            expired,
            degraded,
        })
    }

    /// Drops state for `id` (e.g. after unregistering it).
    pub fn forget(&mut self, id: &str) {
        self.states.remove(id);
    }

    /// State of the fence with `id`, if it has been evaluated.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<&FenceState> {
        self.states.get(id)
    }

    /// Committed containment of `id` (`Unknown` if not yet evaluated).
    #[must_use]
    pub fn containment(&self, id: &str) -> Containment {
        self.states.get(id).map_or(Containment::Unknown, FenceState::containment)
    }

    /// Number of fences with tracked state.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Timestamp of the last accepted fix.
    #[must_use]
    pub const fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::fence::{Expiry, TransitionMask};
    use crate::geo::Coordinate;

    const JOB: Coordinate = Coordinate::new(45.545_184, -122.845_018);

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn fix_at(distance_m: f64, ms: i64) -> PositionFix {
        PositionFix::at(JOB.offset(distance_m, 90.0), 0.0, t(ms))
    }

    fn job_registry(responsiveness_ms: u64, mask: TransitionMask) -> FenceRegistry {
        let reg = FenceRegistry::default();
        let fence = Fence::builder()
            .id("Job")
            .center(JOB)
            .radius_m(100.0)
            .responsiveness_ms(responsiveness_ms)
            .transitions(mask)
            .build()
            .unwrap();
        reg.register(fence).unwrap();
        reg
    }

    fn kinds(outcome: &FixOutcome) -> Vec<TransitionKind> {
        outcome.events().iter().map(|e| e.kind).collect()
    }

    #[test]
    fn job_scenario_enter_then_exit() {
        let reg = job_registry(1000, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();

        assert!(engine.process(&fix_at(5_000.0, 0), &reg).unwrap().events().is_empty());
        assert_eq!(engine.containment("Job"), Containment::Outside);

        assert!(engine.process(&fix_at(50.0, 500), &reg).unwrap().events().is_empty());
        assert_eq!(engine.state("Job").unwrap().pending_since(), Some(t(500)));

        let out = engine.process(&fix_at(50.0, 1600), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
        assert_eq!(out.events()[0].timestamp, t(1600));
        assert_eq!(out.events()[0].fence_id.as_str(), "Job");

        assert!(engine.process(&fix_at(500.0, 2600), &reg).unwrap().events().is_empty());
        let out = engine.process(&fix_at(500.0, 3700), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Exit]);
        assert_eq!(out.events()[0].timestamp, t(3700));
        assert_eq!(engine.containment("Job"), Containment::Outside);
    }

    #[test]
    fn reverted_crossing_emits_nothing() {
        let reg = job_registry(1000, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();

        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        engine.process(&fix_at(50.0, 500), &reg).unwrap();
        let out = engine.process(&fix_at(5_000.0, 900), &reg).unwrap();
        assert!(out.events().is_empty());
        assert!(engine.state("Job").unwrap().pending_since().is_none());

        // The window restarts from scratch after a cancelled flip.
        engine.process(&fix_at(50.0, 1000), &reg).unwrap();
        let out = engine.process(&fix_at(50.0, 1999), &reg).unwrap();
        assert!(out.events().is_empty());
        let out = engine.process(&fix_at(50.0, 2000), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn zero_responsiveness_commits_immediately() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        let out = engine.process(&fix_at(10.0, 1), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn first_fix_seeds_without_event() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        let out = engine.process(&fix_at(10.0, 0), &reg).unwrap();
        assert!(out.events().is_empty());
        assert_eq!(engine.containment("Job"), Containment::Inside);
    }

    #[test]
    fn initial_trigger_enter_fires_on_seed() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let cfg = MonitorConfig {
            initial_trigger: InitialTrigger::Enter,
            ..MonitorConfig::default()
        };
        let mut engine = TransitionEngine::new(&cfg);
        let out = engine.process(&fix_at(10.0, 0), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn initial_trigger_enter_ignores_outside_seed() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let cfg = MonitorConfig {
            initial_trigger: InitialTrigger::Enter,
            ..MonitorConfig::default()
        };
        let mut engine = TransitionEngine::new(&cfg);
        let out = engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        assert!(out.events().is_empty());
    }

    #[test]
    fn mask_filters_events_but_state_still_flips() {
        let reg = job_registry(0, TransitionMask::ENTER);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(10.0, 0), &reg).unwrap();
        let out = engine.process(&fix_at(5_000.0, 10), &reg).unwrap();
        assert!(out.events().is_empty());
        assert_eq!(engine.containment("Job"), Containment::Outside);

        let out = engine.process(&fix_at(10.0, 20), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn empty_mask_is_not_evaluated() {
        let reg = job_registry(0, TransitionMask::NONE);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(10.0, 0), &reg).unwrap();
        assert_eq!(engine.tracked(), 0);
    }

    #[test]
    fn accuracy_widens_the_fence() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();

        // 150m away but 60m accuracy: 150 <= 100 + 60.
        let fix = PositionFix::at(JOB.offset(150.0, 90.0), 60.0, t(10));
        let out = engine.process(&fix, &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
        assert!(!out.events()[0].degraded);
    }

    #[test]
    fn low_accuracy_fix_is_marked_degraded() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();

        let fix = PositionFix::at(JOB.offset(250.0, 90.0), 250.0, t(10));
        let out = engine.process(&fix, &reg).unwrap();
        let FixOutcome::Evaluated { degraded, events, .. } = out else {
            panic!("expected evaluated outcome");
        };
        assert!(degraded);
        assert!(events[0].degraded);
    }

    #[test]
    fn malformed_fix_leaves_state_untouched() {
        let reg = job_registry(1000, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        engine.process(&fix_at(50.0, 500), &reg).unwrap();

        let bad = PositionFix::new(f64::NAN, -122.8, 5.0, t(600));
        let err = engine.process(&bad, &reg).unwrap_err();
        assert!(matches!(err, FixError::NonFiniteCoordinate { .. }));

        let state = engine.state("Job").unwrap();
        assert_eq!(state.containment(), Containment::Outside);
        assert_eq!(state.pending_since(), Some(t(500)));
        assert_eq!(engine.last_accepted(), Some(t(500)));

        // Keeps working afterwards.
        let out = engine.process(&fix_at(50.0, 1500), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn out_of_order_fix_is_discarded() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 1000), &reg).unwrap();

        let out = engine.process(&fix_at(10.0, 500), &reg).unwrap();
        assert_eq!(out, FixOutcome::Stale { last_accepted: t(1000) });
        assert_eq!(engine.containment("Job"), Containment::Outside);
    }

    #[test]
    fn unregistered_fence_stops_emitting() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();

        reg.unregister("Job");
        let out = engine.process(&fix_at(10.0, 10), &reg).unwrap();
        assert!(out.events().is_empty());
        assert!(engine.state("Job").is_none());
    }

    #[test]
    fn expired_fence_is_dropped_and_not_resurrected() {
        let reg = FenceRegistry::default();
        let fence = Fence::builder()
            .id("Temp")
            .center(JOB)
            .radius_m(100.0)
            .expiry(Expiry::At(t(1000)))
            .build()
            .unwrap();
        reg.register(fence).unwrap();

        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        assert_eq!(engine.tracked(), 1);

        let out = engine.process(&fix_at(10.0, 1000), &reg).unwrap();
        let FixOutcome::Evaluated { events, expired, .. } = out else {
            panic!("expected evaluated outcome");
        };
        assert!(events.is_empty());
        assert_eq!(expired, vec![FenceId::from("Temp")]);
        assert_eq!(engine.tracked(), 0);

        let out = engine.process(&fix_at(5_000.0, 2000), &reg).unwrap();
        assert!(out.events().is_empty());
    }

    #[test]
    fn replaced_geometry_resets_state() {
        let reg = job_registry(0, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(150.0, 0), &reg).unwrap();
        assert_eq!(engine.containment("Job"), Containment::Outside);

        // Grow the fence so the same position is now inside.
        let bigger = Fence::new("Job", JOB, 500.0, 0).unwrap();
        reg.register(bigger).unwrap();

        let out = engine.process(&fix_at(150.0, 10), &reg).unwrap();
        assert!(out.events().is_empty(), "replacement re-seeds without an event");
        assert_eq!(engine.containment("Job"), Containment::Inside);
    }

    #[test]
    fn identical_re_registration_keeps_pending_flip() {
        let reg = job_registry(1000, TransitionMask::BOTH);
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        engine.process(&fix_at(50.0, 500), &reg).unwrap();
        assert_eq!(engine.state("Job").unwrap().pending_since(), Some(t(500)));

        let same = reg.get("Job").unwrap();
        assert!(reg.register(same).unwrap().is_some());

        let out = engine.process(&fix_at(50.0, 1400), &reg).unwrap();
        assert!(out.events().is_empty());
        assert_eq!(engine.state("Job").unwrap().pending_since(), Some(t(500)));

        let out = engine.process(&fix_at(50.0, 1500), &reg).unwrap();
        assert_eq!(kinds(&out), vec![TransitionKind::Enter]);
    }

    #[test]
    fn events_are_ordered_by_fence_id() {
        let reg = FenceRegistry::default();
        for id in ["c", "a", "b"] {
            reg.register(Fence::new(id, JOB, 100.0, 0).unwrap()).unwrap();
        }
        let mut engine = TransitionEngine::default();
        engine.process(&fix_at(5_000.0, 0), &reg).unwrap();
        let out = engine.process(&fix_at(0.0, 10), &reg).unwrap();
        let ids: Vec<&str> = out.events().iter().map(|e| e.fence_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
