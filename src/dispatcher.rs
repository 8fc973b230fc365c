//! Event dispatcher worker.
//!
//! Transition events are queued on a bounded channel and delivered to the
//! notification sink by a dedicated thread, so a slow sink never stalls fix
//! processing. When the queue is full the oldest queued event is dropped to
//! make room for the newest one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{MonitorError, MonitorResult, OverflowWarning};
use crate::event::TransitionEvent;
use crate::sink::NotificationSink;

/// Bounded, drop-oldest queue in front of a `NotificationSink`.
pub struct EventDispatcher {
    capacity: usize,
    tx: Mutex<Option<Sender<TransitionEvent>>>,
    // Second receiver used only to evict the oldest event on overflow.
    evict_rx: Receiver<TransitionEvent>,
    dropped: AtomicU64,
    delivered: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("capacity", &self.capacity)
            .field("queued", &self.evict_rx.len())
            .field("dropped", &self.dropped())
            .field("delivered", &self.delivered())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Starts the delivery thread for `sink`.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the thread cannot be spawned.
    pub fn new(capacity: usize, sink: Arc<dyn NotificationSink>) -> MonitorResult<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<TransitionEvent>(capacity);
        let evict_rx = rx.clone();

        let delivered = Arc::new(AtomicU64::new(0));
        let thread_delivered = Arc::clone(&delivered);
        let join = thread::Builder::new()
            .name("geofence-dispatch".to_string())
            .spawn(move || {
                // Exits once the sender is closed and the queue is drained.
                for event in &rx {
                    sink.deliver(&event);
                    thread_delivered.fetch_add(1, Ordering::Relaxed);
                }
            })
            .map_err(|e| MonitorError::internal(format!("failed to spawn dispatcher: {e}")))?;

        Ok(Self {
            capacity,
            tx: Mutex::new(Some(tx)),
            evict_rx,
            dropped: AtomicU64::new(0),
            delivered,
            join: Mutex::new(Some(join)),
        })
    }

    /// Queues `event` without blocking.
    ///
    /// Returns an `OverflowWarning` if an older event had to be dropped (or,
    /// after `close`, if this event itself was dropped).
    pub fn enqueue(&self, event: TransitionEvent) -> Option<OverflowWarning> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(fence_id = %event.fence_id, "dispatcher closed; event dropped");
            return Some(OverflowWarning {
                dropped_fence_id: event.fence_id.to_string(),
                capacity: self.capacity,
            });
        };

        let mut pending = event;
        let mut warning = None;
        loop {
            match tx.try_send(pending) {
                Ok(()) => return warning,
                Err(TrySendError::Full(back)) => {
                    // The worker may drain concurrently; only count real evictions.
                    if let Ok(oldest) = self.evict_rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        let w = OverflowWarning {
                            dropped_fence_id: oldest.fence_id.to_string(),
                            capacity: self.capacity,
                        };
                        warn!(
                            dropped_fence_id = %w.dropped_fence_id,
                            dropped_kind = %oldest.kind,
                            capacity = self.capacity,
                            "event queue full; dropped oldest event"
                        );
                        warning = Some(w);
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(back)) => {
                    // Unreachable while `evict_rx` is alive; handled for completeness.
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Some(OverflowWarning {
                        dropped_fence_id: back.fence_id.to_string(),
                        capacity: self.capacity,
                    });
                }
            }
        }
    }

    /// Closes the queue and waits for queued events to be delivered.
    ///
    /// Idempotent. Events enqueued afterwards are dropped.
    pub fn close(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(tx);

        let handle = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }

    /// Queue capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events currently queued.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.evict_rx.len()
    }

    /// Events dropped due to overflow or after close.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events handed to the sink.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
