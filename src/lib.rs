//! # geofence-monitor - auto clock-in geofencing
//!
//! A self-contained geofence monitor for timesheet automation: register
//! circular fences around work sites, feed it position fixes, and receive a
//! debounced `enter`/`exit` event (rendered as a log line or a notification)
//! whenever the user crosses a fence boundary.
//!
//! ## Core Concepts
//!
//! - **Fence**: a circular region with an id, radius, expiry, responsiveness
//!   window and trigger mask
//! - **PositionFix**: a timestamped position with an accuracy radius
//! - **TransitionEngine**: haversine containment plus per-fence debounce
//! - **MonitorCoordinator**: start/stop, add/remove fence, ordered delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geofence_monitor::{Fence, LogSink, ChannelSource, JsonFileIdStore, MonitorConfig, MonitorCoordinator};
//!
//! let source = Arc::new(ChannelSource::default());
//! let monitor = MonitorCoordinator::new(
//!     MonitorConfig::default(),
//!     source.clone(),
//!     Arc::new(LogSink),
//!     Box::new(JsonFileIdStore::new("fences.json")),
//! )?;
//!
//! monitor.add_fence(
//!     Fence::builder()
//!         .id("Job")
//!         .circular_region(45.545184, -122.845018, 100.0)
//!         .responsiveness_ms(1000)
//!         .build()?,
//! )?;
//! monitor.start()?;
//! source.sender().send(fix)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod event;
pub mod fence;
pub mod fix;
pub mod geo;

// Monitoring
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod sink;
pub mod source;
pub mod store;

// Re-export primary types at crate root for convenience
pub use config::{InitialTrigger, MonitorConfig};
pub use coordinator::{MonitorCoordinator, MonitorStats};
pub use dispatcher::EventDispatcher;
pub use engine::{Containment, FenceState, FixOutcome, TransitionEngine};
pub use error::{
    FenceError, FixError, MonitorError, MonitorResult, OverflowWarning, SourceError, StoreError,
};
pub use event::{Notification, NotificationTarget, TransitionEvent, NOTIFICATION_TITLE};
pub use fence::{Expiry, Fence, FenceBuilder, FenceId, TransitionKind, TransitionMask};
pub use fix::PositionFix;
pub use geo::{haversine_m, Coordinate};
pub use registry::{FenceList, FenceRegistry};
pub use sink::{CollectingSink, LogSink, NotificationSink};
pub use source::{connect_within, ChannelSource, FixSender, FixStream, PositionSource, ReplaySource};
pub use store::{FenceIdStore, JsonFileIdStore, MemoryIdStore};
