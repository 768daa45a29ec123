//! Observability events and the injected sink.
//!
//! Failures in this subsystem are classified outcomes, never fatal: the
//! capture stream keeps running through permission errors, the pipeline
//! absorbs delivery failures, and the registry is treated as "no data" when
//! unavailable. Each such outcome is reported as a typed [`TrackerEvent`]
//! through an [`EventSink`], and the sink decides whether to surface, log,
//! or discard it.

use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::capture::CaptureError;

/// A classified, non-fatal outcome reported by the telemetry subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A position fix attempt failed; the stream continues.
    CaptureFailed {
        /// Name of the position source.
        source: &'static str,
        /// The classified failure.
        error: CaptureError,
    },

    /// Reverse geocoding produced no enrichment for a sample.
    EnrichmentUnavailable {
        /// Why the lookup degraded.
        reason: String,
    },

    /// A fire-and-forget collector delivery failed. Never retried.
    DeliveryFailed {
        /// User the submission belonged to.
        user_id: String,
        /// Why the delivery failed.
        reason: String,
    },

    /// A registry read or write failed and was absorbed.
    StoreUnavailable {
        /// The operation that failed.
        operation: &'static str,
        /// Why the store was unavailable.
        reason: String,
    },

    /// A session transitioned to `Stopped`.
    SessionStopped {
        /// The stopped user identifier.
        user_id: String,
    },

    /// Visible-mode duration counter tick (once per second while active).
    DurationTick {
        /// User the counter belongs to.
        user_id: String,
        /// Tracked seconds so far.
        seconds: u64,
    },
}

/// Destination for [`TrackerEvent`]s.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Deliver one event. Must not block.
    fn emit(&self, event: &TrackerEvent);
}

/// Sink that routes events to `tracing` at severity matching their impact.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &TrackerEvent) {
        match event {
            TrackerEvent::CaptureFailed { source, error } => {
                warn!("capture failure from {source}: {error}");
            }
            TrackerEvent::EnrichmentUnavailable { reason } => {
                debug!("no enrichment: {reason}");
            }
            TrackerEvent::DeliveryFailed { user_id, reason } => {
                debug!("delivery failed for {user_id}: {reason}");
            }
            TrackerEvent::StoreUnavailable { operation, reason } => {
                warn!("registry unavailable during {operation}: {reason}");
            }
            TrackerEvent::SessionStopped { user_id } => {
                info!("session stopped for {user_id}");
            }
            TrackerEvent::DurationTick { user_id, seconds } => {
                trace!("tracking {user_id} for {seconds}s");
            }
        }
    }
}

/// Sink that discards every event. Used in silent operating mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &TrackerEvent) {}
}


#[cfg(test)]
mod tests {
    use super::testing::CollectSink;
    use super::*;

    #[test]
    fn test_log_sink_does_not_panic() {
        let sink = LogSink;
        sink.emit(&TrackerEvent::CaptureFailed {
            source: "replay",
            error: CaptureError::Timeout,
        });
        sink.emit(&TrackerEvent::SessionStopped {
            user_id: "USR-1".to_string(),
        });
    }

    #[test]
    fn test_null_sink_discards() {
        let sink = NullSink;
        sink.emit(&TrackerEvent::DurationTick {
            user_id: "USR-1".to_string(),
            seconds: 1,
        });
    }

    #[test]
    fn test_collect_sink_records_in_order() {
        let sink = CollectSink::new();
        sink.emit(&TrackerEvent::EnrichmentUnavailable {
            reason: "timeout".to_string(),
        });
        sink.emit(&TrackerEvent::DeliveryFailed {
            user_id: "USR-1".to_string(),
            reason: "connection refused".to_string(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            TrackerEvent::EnrichmentUnavailable { .. }
        ));
        assert_eq!(
            sink.count_matching(|e| matches!(e, TrackerEvent::DeliveryFailed { .. })),
            1
        );
    }
}
