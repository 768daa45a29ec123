//! `geotrace` - location telemetry with a remote command channel
//!
//! This library provides the producer that samples device position and ships
//! enriched telemetry to a remote collector, the shared registry the admin
//! view reads, and the polling command channel that carries admin-issued
//! stop commands back to the producer with bounded latency.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod admin;
pub mod capture;
pub mod cli;
pub mod command;
pub mod config;
pub mod enrich;
pub mod error;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod sample;
pub mod session;
pub mod store;
pub mod tracker;

pub use admin::AdminView;
pub use capture::{CaptureEngine, CaptureError, CaptureHandle, PositionSource};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventSink, TrackerEvent};
pub use logging::init_logging;
pub use registry::Registry;
pub use sample::{Enrichment, LocationSample, SampleOrigin};
pub use session::{SessionState, TrackedUserRecord, TrackingSession};
pub use store::Store;
pub use tracker::{Tracker, TrackerHandle};
