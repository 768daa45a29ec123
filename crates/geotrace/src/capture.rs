//! Location capture engine.
//!
//! Wraps a device position source as a cancellable, lazy, infinite stream of
//! [`LocationSample`]s. Each fix request is bounded by a timeout and asks
//! the source for a fresh (never cached) position. Failures are classified
//! and reported through the event sink, and the stream continues attempting
//! subsequent fixes; only [`CaptureHandle::stop`] ends it.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::events::{EventSink, TrackerEvent};
use crate::sample::{LocationSample, SampleOrigin};

/// Capacity of the sample channel between the engine task and its consumer.
const SAMPLE_CHANNEL_CAPACITY: usize = 16;

/// Classified, non-fatal position failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform refused access to position data.
    #[error("position permission denied")]
    PermissionDenied,

    /// No position could be determined.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// The bounded wait for a fix elapsed.
    #[error("position request timed out")]
    Timeout,
}

/// A raw position fix as delivered by a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    /// Latitude in signed decimal degrees.
    pub latitude: f64,
    /// Longitude in signed decimal degrees.
    pub longitude: f64,
    /// Estimated accuracy radius in meters, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Options applied to every fix request.
#[derive(Debug, Clone)]
pub struct FixOptions {
    /// Bounded wait per fix request.
    pub timeout: Duration,

    /// Maximum acceptable fix age. Zero means a cached fix is never
    /// acceptable, trading battery and latency for freshness.
    pub max_staleness: Duration,

    /// Request the most accurate position the source can provide.
    pub high_accuracy: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_staleness: Duration::ZERO,
            high_accuracy: true,
        }
    }
}

/// A device position source.
///
/// Implementors deliver one fix per `next_fix` call, pacing calls at the
/// device's natural emission rate. The engine adds the bounded wait on top,
/// so a source may block indefinitely.
#[async_trait::async_trait]
pub trait PositionSource: Send {
    /// The name of this source (for logging and failure classification).
    fn name(&self) -> &'static str;

    /// Wait for the next fix.
    ///
    /// # Errors
    ///
    /// Returns a classified [`CaptureError`]; the engine treats every kind
    /// as non-fatal and keeps requesting fixes.
    async fn next_fix(&mut self, options: &FixOptions) -> Result<RawFix, CaptureError>;
}

/// Cancellation handle for a running capture stream.
///
/// Cloneable; stopping through any clone cancels the stream and releases
/// the underlying source task.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    cancel: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl CaptureHandle {
    fn new() -> Self {
        Self {
            cancel: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the capture stream immediately.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    /// Check whether the stream has been cancelled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The capture engine.
#[derive(Debug, Clone)]
pub struct CaptureEngine {
    options: FixOptions,
}

impl CaptureEngine {
    /// Create an engine with the given fix options.
    #[must_use]
    pub fn new(options: FixOptions) -> Self {
        Self { options }
    }

    /// Start an unbounded capture stream from the given source.
    ///
    /// Returns the cancellation handle and the sample receiver. The first
    /// delivered sample is tagged `initial_fix`, all subsequent ones
    /// `continuous`. The stream ends only when the handle is stopped or the
    /// receiver is dropped.
    #[must_use]
    pub fn start(
        &self,
        mut source: Box<dyn PositionSource>,
        sink: Arc<dyn EventSink>,
    ) -> (CaptureHandle, mpsc::Receiver<LocationSample>) {
        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let handle = CaptureHandle::new();
        let task_handle = handle.clone();
        let options = self.options.clone();

        tokio::spawn(async move {
            let mut first = true;
            loop {
                if task_handle.is_stopped() {
                    break;
                }

                let fix = tokio::select! {
                    () = task_handle.cancel.notified() => break,
                    outcome = tokio::time::timeout(options.timeout, source.next_fix(&options)) => {
                        match outcome {
                            Ok(Ok(fix)) => fix,
                            Ok(Err(error)) => {
                                sink.emit(&TrackerEvent::CaptureFailed {
                                    source: source.name(),
                                    error,
                                });
                                continue;
                            }
                            Err(_) => {
                                sink.emit(&TrackerEvent::CaptureFailed {
                                    source: source.name(),
                                    error: CaptureError::Timeout,
                                });
                                continue;
                            }
                        }
                    }
                };

                let origin = if first {
                    SampleOrigin::InitialFix
                } else {
                    SampleOrigin::Continuous
                };
                first = false;

                let sample = LocationSample::new(
                    fix.latitude,
                    fix.longitude,
                    fix.accuracy,
                    origin,
                    Utc::now(),
                );
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
            debug!("capture stream ended");
        });

        (handle, rx)
    }
}

/// One step of a replay script: a fix or a classified failure.
pub type ReplayEntry = Result<RawFix, CaptureError>;

/// A position source that replays a fixed script of fixes and failures.
///
/// Entries are delivered at a fixed interval; once the script is exhausted
/// the source blocks forever, modelling a device that has gone quiet (the
/// engine then surfaces timeouts until it is cancelled).
#[derive(Debug)]
pub struct ReplaySource {
    entries: VecDeque<ReplayEntry>,
    interval: Duration,
}

impl ReplaySource {
    /// Create a source that replays the given fixes.
    #[must_use]
    pub fn new(fixes: Vec<RawFix>, interval: Duration) -> Self {
        Self {
            entries: fixes.into_iter().map(Ok).collect(),
            interval,
        }
    }

    /// Create a source from a script that may include failures.
    #[must_use]
    pub fn with_script(entries: Vec<ReplayEntry>, interval: Duration) -> Self {
        Self {
            entries: entries.into(),
            interval,
        }
    }

    /// Load a replay source from a JSON file containing an array of fixes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>, interval: Duration) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let fixes: Vec<RawFix> = serde_json::from_str(&raw)?;
        Ok(Self::new(fixes, interval))
    }

    /// Number of entries left in the script.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait::async_trait]
impl PositionSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn next_fix(&mut self, _options: &FixOptions) -> Result<RawFix, CaptureError> {
        tokio::time::sleep(self.interval).await;
        match self.entries.pop_front() {
            Some(entry) => entry,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::CollectSink;
    use crate::events::NullSink;

    fn fix(latitude: f64, longitude: f64) -> RawFix {
        RawFix {
            latitude,
            longitude,
            accuracy: Some(10.0),
        }
    }

    #[test]
    fn test_fix_options_default() {
        let options = FixOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(8));
        assert_eq!(options.max_staleness, Duration::ZERO);
        assert!(options.high_accuracy);
    }

    #[test]
    fn test_capture_error_display() {
        assert_eq!(
            CaptureError::PermissionDenied.to_string(),
            "position permission denied"
        );
        assert!(CaptureError::PositionUnavailable("no satellites".to_string())
            .to_string()
            .contains("no satellites"));
        assert!(CaptureError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn test_handle_stop_is_shared_across_clones() {
        let handle = CaptureHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_stopped());

        handle.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_raw_fix_json() {
        let parsed: Vec<RawFix> =
            serde_json::from_str(r#"[{"latitude": 26.7795, "longitude": 80.976}]"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].accuracy.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_tags_first_sample_as_initial_fix() {
        let source = ReplaySource::new(
            vec![fix(1.0, 2.0), fix(3.0, 4.0)],
            Duration::from_millis(100),
        );
        let engine = CaptureEngine::new(FixOptions::default());
        let (handle, mut rx) = engine.start(Box::new(source), Arc::new(NullSink));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.origin, SampleOrigin::InitialFix);
        assert_eq!(first.latitude, 1.0);
        assert_eq!(first.accuracy, Some(10.0));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.origin, SampleOrigin::Continuous);
        assert_eq!(second.latitude, 3.0);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_and_stream_continues() {
        let source = ReplaySource::with_script(
            vec![
                Err(CaptureError::PermissionDenied),
                Err(CaptureError::PositionUnavailable("indoors".to_string())),
                Ok(fix(5.0, 6.0)),
            ],
            Duration::from_millis(100),
        );
        let engine = CaptureEngine::new(FixOptions::default());
        let sink = Arc::new(CollectSink::new());
        let (handle, mut rx) =
            engine.start(Box::new(source), Arc::clone(&sink) as Arc<dyn EventSink>);

        // The fix after two failures still arrives, tagged as the first.
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.origin, SampleOrigin::InitialFix);
        assert_eq!(sample.latitude, 5.0);

        assert_eq!(
            sink.count_matching(|e| matches!(e, TrackerEvent::CaptureFailed { .. })),
            2
        );

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_surfaces_timeout() {
        // Interval longer than the bounded wait: every request times out.
        let source = ReplaySource::new(vec![fix(1.0, 2.0)], Duration::from_secs(30));
        let engine = CaptureEngine::new(FixOptions {
            timeout: Duration::from_secs(8),
            ..FixOptions::default()
        });
        let sink = Arc::new(CollectSink::new());
        let (handle, _rx) =
            engine.start(Box::new(source), Arc::clone(&sink) as Arc<dyn EventSink>);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(sink.count_matching(|e| matches!(
            e,
            TrackerEvent::CaptureFailed {
                error: CaptureError::Timeout,
                ..
            }
        )) >= 1);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let source = ReplaySource::new(
            vec![fix(1.0, 2.0), fix(3.0, 4.0), fix(5.0, 6.0)],
            Duration::from_millis(100),
        );
        let engine = CaptureEngine::new(FixOptions::default());
        let (handle, mut rx) = engine.start(Box::new(source), Arc::new(NullSink));

        let _ = rx.recv().await.unwrap();
        handle.stop();

        // After cancellation the channel drains and closes.
        while rx.recv().await.is_some() {}
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_replay_source_exhaustion_blocks() {
        let mut source = ReplaySource::new(vec![fix(1.0, 2.0)], Duration::from_millis(1));
        let options = FixOptions::default();

        assert!(source.next_fix(&options).await.is_ok());
        assert_eq!(source.remaining(), 0);

        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            source.next_fix(&options),
        )
        .await;
        assert!(pending.is_err());
    }
}
