//! Monitor coordinator.
//!
//! The coordinator ties the registry, engine, position source, dispatcher and
//! id store together behind a small command interface (`add_fence`,
//! `remove_fence`, `start`, `stop`) that a front end calls synchronously.
//!
//! Fix ingestion is serialized by a single engine mutex: the intake thread and
//! direct `process_fix` callers both go through it, and events are queued for
//! the sink while the mutex is held so the sink sees them in emission order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::dispatcher::EventDispatcher;
use crate::engine::{Containment, FixOutcome, TransitionEngine};
use crate::error::{MonitorError, MonitorResult};
use crate::fence::{Fence, FenceId};
use crate::fix::PositionFix;
use crate::registry::{FenceList, FenceRegistry};
use crate::sink::NotificationSink;
use crate::source::{FixStream, PositionSource};
use crate::store::FenceIdStore;

/// Counters describing monitor activity.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub processed_fixes: u64,
    pub stale_fixes: u64,
    pub rejected_fixes: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub events_delivered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    stale: AtomicU64,
    rejected: AtomicU64,
    emitted: AtomicU64,
}

/// Active fence ids and the store they are written to.
///
/// Seeded from the store, so ids saved before a restart survive until they
/// are removed or expire, whether or not they were re-registered.
struct IdLedger {
    store: Box<dyn FenceIdStore>,
    active: BTreeSet<FenceId>,
}

impl IdLedger {
    fn save(&self) -> MonitorResult<()> {
        self.store.save(&self.active).map_err(|err| {
            warn!(error = %err, "failed to persist fence ids");
            MonitorError::from(err)
        })
    }
}

/// Everything the intake thread needs.
struct Pipeline {
    registry: Arc<FenceRegistry>,
    engine: Mutex<TransitionEngine>,
    dispatcher: EventDispatcher,
    ids: Mutex<IdLedger>,
    counters: Counters,
}

impl Pipeline {
    fn engine(&self) -> MutexGuard<'_, TransitionEngine> {
        // A panic mid-fix cannot leave a half-applied state: each fence's
        // state is replaced as a unit.
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ids(&self) -> MutexGuard<'_, IdLedger> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ingest(&self, fix: &PositionFix) -> MonitorResult<FixOutcome> {
        let mut engine = self.engine();
        let outcome = match engine.process(fix, &self.registry) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(err.into());
            }
        };

        match &outcome {
            FixOutcome::Stale { .. } => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
            }
            FixOutcome::Evaluated { events, expired, .. } => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                if !expired.is_empty() {
                    let mut ids = self.ids();
                    let before = ids.active.len();
                    for id in expired {
                        ids.active.remove(id);
                    }
                    // The fix itself was evaluated; a failed write is logged.
                    if ids.active.len() != before {
                        let _ = ids.save();
                    }
                }
                for event in events {
                    self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                    // Overflow is logged by the dispatcher and counted in stats.
                    let _ = self.dispatcher.enqueue(event.clone());
                }
            }
        }
        Ok(outcome)
    }
}

struct Intake {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Orchestrates geofence monitoring.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use geofence_monitor::{
///     ChannelSource, CollectingSink, Fence, MemoryIdStore, MonitorConfig, MonitorCoordinator,
/// };
///
/// let source = Arc::new(ChannelSource::default());
/// let sink = Arc::new(CollectingSink::new());
/// let monitor = MonitorCoordinator::new(
///     MonitorConfig::default(),
///     source.clone(),
///     sink.clone(),
///     Box::new(MemoryIdStore::new()),
/// )
/// .unwrap();
///
/// let job = Fence::builder()
///     .id("Job")
///     .circular_region(45.545184, -122.845018, 100.0)
///     .responsiveness_ms(1000)
///     .build()
///     .unwrap();
/// monitor.add_fence(job).unwrap();
/// monitor.start().unwrap();
/// assert!(monitor.is_running());
/// monitor.stop();
/// ```
pub struct MonitorCoordinator {
    cfg: MonitorConfig,
    pipeline: Arc<Pipeline>,
    source: Arc<dyn PositionSource>,
    persisted_ids: BTreeSet<FenceId>,
    intake: Mutex<Option<Intake>>,
}

impl std::fmt::Debug for MonitorCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorCoordinator")
            .field("cfg", &self.cfg)
            .field("fences", &self.pipeline.registry.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MonitorCoordinator {
    /// Creates a stopped coordinator and reads the persisted fence ids.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` for an invalid configuration,
    /// `MonitorError::Store` if the id store cannot be read, or
    /// `MonitorError::Internal` if the dispatcher cannot start.
    pub fn new(
        cfg: MonitorConfig,
        source: Arc<dyn PositionSource>,
        sink: Arc<dyn NotificationSink>,
        store: Box<dyn FenceIdStore>,
    ) -> MonitorResult<Self> {
        let cfg = cfg.validate()?;
        let persisted_ids = store.load()?;
        if !persisted_ids.is_empty() {
            info!(count = persisted_ids.len(), "loaded persisted fence ids");
        }

        let pipeline = Pipeline {
            registry: Arc::new(FenceRegistry::new(cfg.max_fences)),
            engine: Mutex::new(TransitionEngine::new(&cfg)),
            dispatcher: EventDispatcher::new(cfg.event_queue_capacity, sink)?,
            ids: Mutex::new(IdLedger {
                store,
                active: persisted_ids.clone(),
            }),
            counters: Counters::default(),
        };

        Ok(Self {
            cfg,
            pipeline: Arc::new(pipeline),
            source,
            persisted_ids,
            intake: Mutex::new(None),
        })
    }

    fn intake(&self) -> MutexGuard<'_, Option<Intake>> {
        self.intake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects to the position source and starts consuming fixes.
    ///
    /// Idempotent while running. Connection failures are reported, not
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Source` if the source is unavailable or does
    /// not connect within the configured timeout.
    pub fn start(&self) -> MonitorResult<()> {
        let mut intake = self.intake();
        if let Some(current) = intake.as_ref() {
            if !current.handle.is_finished() {
                return Ok(());
            }
        }
        // The previous stream closed on its own; reap it before reconnecting.
        if let Some(finished) = intake.take() {
            let _ = finished.handle.join();
        }

        let stream = self.source.connect(self.cfg.connect_timeout()).map_err(|err| {
            warn!(error = %err, "failed to start geofence monitoring");
            MonitorError::from(err)
        })?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let pipeline = Arc::clone(&self.pipeline);
        let handle = thread::Builder::new()
            .name("geofence-intake".to_string())
            .spawn(move || intake_loop(&pipeline, &stream, &stop_rx))
            .map_err(|e| MonitorError::internal(format!("failed to spawn intake thread: {e}")))?;

        *intake = Some(Intake { stop_tx, handle });
        info!(fences = self.pipeline.registry.len(), "started geofence monitoring");
        Ok(())
    }

    /// Stops consuming fixes. Fences stay registered.
    ///
    /// Idempotent. When this returns, no further fix will be processed by
    /// the intake thread; a fix already in flight completes first.
    pub fn stop(&self) {
        let Some(intake) = self.intake().take() else {
            return;
        };
        let _ = intake.stop_tx.try_send(());
        drop(intake.stop_tx);
        if intake.handle.join().is_err() {
            warn!("intake thread panicked");
        }
        self.source.disconnect();
        info!("stopped geofence monitoring");
    }

    /// Blocks until the intake loop ends because the source closed.
    ///
    /// Returns immediately when not running.
    pub fn wait(&self) {
        let Some(intake) = self.intake().take() else {
            return;
        };
        if intake.handle.join().is_err() {
            warn!("intake thread panicked");
        }
        self.source.disconnect();
    }

    /// Returns true while the intake thread is consuming fixes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.intake()
            .as_ref()
            .is_some_and(|intake| !intake.handle.is_finished())
    }

    /// Registers (or replaces) a fence and persists the id set.
    ///
    /// The id is added to the set loaded at startup; saved ids that have not
    /// been re-registered are kept. The next processed fix observes the new
    /// fence.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidFence` if the fence is rejected, or
    /// `MonitorError::Store` if the id set could not be written; in that
    /// case the fence is registered in memory but not persisted.
    pub fn add_fence(&self, fence: Fence) -> MonitorResult<()> {
        let id = fence.id.clone();
        let replaced = self.pipeline.registry.register(fence)?;
        info!(fence_id = %id, replaced = replaced.is_some(), "fence registered");
        let mut ids = self.pipeline.ids();
        ids.active.insert(id);
        ids.save()
    }

    /// Unregisters a fence and persists the id set.
    ///
    /// Also removes ids that are only known from the store, i.e. saved
    /// before a restart and not re-registered since. Returns whether the id
    /// was registered or saved; unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Store` if the id set could not be written.
    pub fn remove_fence(&self, id: &str) -> MonitorResult<bool> {
        let registered = self.pipeline.registry.unregister(id).is_some();
        if registered {
            self.pipeline.engine().forget(id);
        }

        let mut ids = self.pipeline.ids();
        let saved = ids.active.remove(id);
        if !registered && !saved {
            debug!(fence_id = id, "remove of unknown fence ignored");
            return Ok(false);
        }
        info!(fence_id = id, registered, "fence removed");
        ids.save()?;
        Ok(true)
    }

    /// Processes one fix synchronously on the caller's thread.
    ///
    /// Serialized with the intake thread. Usable whether or not the
    /// coordinator is running.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidFix` for malformed fixes; the monitor
    /// keeps working.
    pub fn process_fix(&self, fix: &PositionFix) -> MonitorResult<FixOutcome> {
        self.pipeline.ingest(fix)
    }

    /// Snapshot of the registered fences.
    #[must_use]
    pub fn fences(&self) -> FenceList {
        self.pipeline.registry.list()
    }

    /// The shared registry.
    #[must_use]
    pub fn registry(&self) -> &FenceRegistry {
        &self.pipeline.registry
    }

    /// Committed containment for `id`.
    #[must_use]
    pub fn containment(&self, id: &str) -> Containment {
        self.pipeline.engine().containment(id)
    }

    /// Fence ids read from the store at construction.
    ///
    /// Front ends use these to re-register the fences that were active
    /// before a restart.
    #[must_use]
    pub const fn persisted_ids(&self) -> &BTreeSet<FenceId> {
        &self.persisted_ids
    }

    /// Ids currently written to the store: every registered fence plus
    /// saved ids not yet re-registered, removed or expired.
    #[must_use]
    pub fn active_ids(&self) -> BTreeSet<FenceId> {
        self.pipeline.ids().active.clone()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.cfg
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        let c = &self.pipeline.counters;
        MonitorStats {
            processed_fixes: c.processed.load(Ordering::Relaxed),
            stale_fixes: c.stale.load(Ordering::Relaxed),
            rejected_fixes: c.rejected.load(Ordering::Relaxed),
            events_emitted: c.emitted.load(Ordering::Relaxed),
            events_dropped: self.pipeline.dispatcher.dropped(),
            events_delivered: self.pipeline.dispatcher.delivered(),
        }
    }

    /// Stops intake and delivers every queued event before returning.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for MonitorCoordinator {
    fn drop(&mut self) {
        self.stop();
        self.pipeline.dispatcher.close();
    }
}

fn intake_loop(pipeline: &Pipeline, stream: &FixStream, stop_rx: &Receiver<()>) {
    debug!("intake loop started");
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(stream.receiver()) -> msg => {
                let Ok(fix) = msg else {
                    info!("position source closed");
                    break;
                };
                // Honor a stop that raced with this fix.
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                // Rejected fixes are logged by the engine and counted.
                let _ = pipeline.ingest(&fix);
            }
        }
    }
    debug!("intake loop exited");
}
