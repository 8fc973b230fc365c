//! Position sources.
//!
//! A `PositionSource` is the monitor's view of the platform location service:
//! something that can be connected to (and may refuse, e.g. when location
//! permission is denied) and then delivers an unbounded stream of fixes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::SourceError;
use crate::fix::PositionFix;

/// Stream of fixes returned by a successful connection.
///
/// The stream may never close. It closes when every sender is dropped.
#[derive(Debug, Clone)]
pub struct FixStream {
    rx: Receiver<PositionFix>,
}

impl FixStream {
    /// Wraps a channel receiver.
    #[must_use]
    pub const fn new(rx: Receiver<PositionFix>) -> Self {
        Self { rx }
    }

    /// The underlying receiver, for use in `select!`.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver<PositionFix> {
        &self.rx
    }

    /// Receives the next fix with a timeout.
    ///
    /// Returns `None` on timeout or when the stream has closed.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PositionFix> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Provider of position fixes.
pub trait PositionSource: Send + Sync {
    /// Connects to the source, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the source refuses the
    /// connection, or `SourceError::Timeout` if it does not answer in time.
    fn connect(&self, timeout: Duration) -> Result<FixStream, SourceError>;

    /// Called when the monitor stops consuming the stream.
    fn disconnect(&self) {}
}

/// Runs a blocking `handshake` on a helper thread and waits at most `timeout`.
///
/// Sources with slow or potentially hanging handshakes use this to honor the
/// connection bound. A handshake that overruns is abandoned; its thread exits
/// whenever the handshake returns.
///
/// # Errors
///
/// Returns the handshake's error, or `SourceError::Timeout`.
pub fn connect_within<F>(timeout: Duration, handshake: F) -> Result<FixStream, SourceError>
where
    F: FnOnce() -> Result<FixStream, SourceError> + Send + 'static,
{
    let (reply_tx, reply_rx) = bounded::<Result<FixStream, SourceError>>(1);
    thread::Builder::new()
        .name("geofence-connect".to_string())
        .spawn(move || {
            let _ = reply_tx.send(handshake());
        })
        .map_err(|e| SourceError::Unavailable {
            reason: format!("failed to spawn connect thread: {e}"),
        })?;

    match reply_rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable {
            reason: "connect handshake aborted".to_string(),
        }),
    }
}

/// Handle for pushing fixes into a `ChannelSource`.
#[derive(Debug, Clone)]
pub struct FixSender {
    tx: Sender<PositionFix>,
}

impl FixSender {
    /// Pushes a fix, blocking while the intake buffer is full.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the source was dropped.
    pub fn send(&self, fix: PositionFix) -> Result<(), SourceError> {
        self.tx.send(fix).map_err(|_| SourceError::Unavailable {
            reason: "position source closed".to_string(),
        })
    }

    /// Pushes a fix without blocking. Returns false if it was not accepted.
    #[must_use]
    pub fn try_send(&self, fix: PositionFix) -> bool {
        match self.tx.try_send(fix) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Push-delivered source backed by a bounded channel.
///
/// Fixes pushed while the monitor is stopped stay buffered (up to the
/// channel capacity) and are consumed after the next `start()`.
#[derive(Debug)]
pub struct ChannelSource {
    tx: Sender<PositionFix>,
    rx: Receiver<PositionFix>,
    available: Arc<AtomicBool>,
    handshake_delay: Duration,
}

impl ChannelSource {
    /// Creates a source buffering up to `capacity` undelivered fixes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            available: Arc::new(AtomicBool::new(true)),
            handshake_delay: Duration::ZERO,
        }
    }

    /// Simulates a slow connection handshake.
    #[must_use]
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// A handle for pushing fixes.
    #[must_use]
    pub fn sender(&self) -> FixSender {
        FixSender { tx: self.tx.clone() }
    }

    /// Marks the source (un)available, e.g. when location permission is
    /// granted or revoked.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Returns true if `connect` would currently succeed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PositionSource for ChannelSource {
    fn connect(&self, timeout: Duration) -> Result<FixStream, SourceError> {
        if !self.is_available() {
            return Err(SourceError::Unavailable {
                reason: "location services unavailable or permission denied".to_string(),
            });
        }

        if self.handshake_delay.is_zero() {
            return Ok(FixStream::new(self.rx.clone()));
        }

        let rx = self.rx.clone();
        let delay = self.handshake_delay;
        connect_within(timeout, move || {
            thread::sleep(delay);
            Ok(FixStream::new(rx))
        })
    }
}

/// Finite source replaying recorded fixes, then closing.
///
/// Each connection replays the full recording from the start.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    fixes: Vec<PositionFix>,
}

impl ReplaySource {
    /// Creates a replay of `fixes` in the given order.
    #[must_use]
    pub fn new(fixes: Vec<PositionFix>) -> Self {
        Self { fixes }
    }

    /// Number of recorded fixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

impl PositionSource for ReplaySource {
    fn connect(&self, _timeout: Duration) -> Result<FixStream, SourceError> {
        let (tx, rx) = unbounded();
        for fix in &self.fixes {
            // The receiver is alive in this scope; send cannot fail.
            let _ = tx.send(*fix);
        }
        Ok(FixStream::new(rx))
    }
}
