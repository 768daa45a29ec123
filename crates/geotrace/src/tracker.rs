//! Producer orchestration.
//!
//! [`Tracker::run`] wires the capture engine into the submission pipeline
//! and consumes the command channel, closing the loop between the admin
//! view and the producer. Three periodic concerns coexist per session:
//! the capture stream (event-driven), the command poll (fixed period), and
//! a one-second duration tick surfaced only in visible mode. None of them
//! synchronizes with the others beyond the shared registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::capture::{CaptureEngine, PositionSource};
use crate::command::{AdminCommand, CommandChannel, CommandKind};
use crate::error::Result;
use crate::events::{EventSink, TrackerEvent};
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::sample::{LocationSample, SampleOrigin};
use crate::session::{SessionState, TrackingSession};

/// Capacity of the manual control channel.
const CONTROL_CHANNEL_CAPACITY: usize = 4;

/// Produces a fresh position source for each capture subscription.
///
/// Called once at startup and again on every resume, since pausing releases
/// the previous subscription.
pub type SourceFactory = Box<dyn FnMut() -> Box<dyn PositionSource> + Send>;

/// Manual control requests issued through a [`TrackerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlRequest {
    Pause,
    Resume,
    Stop,
}

/// Handle for manual pause/resume/stop of a running tracker.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl TrackerHandle {
    /// Request a manual pause. No-op if the session is not active.
    pub async fn pause(&self) {
        let _ = self.tx.send(ControlRequest::Pause).await;
    }

    /// Request a manual resume. No-op if the session is not paused.
    pub async fn resume(&self) {
        let _ = self.tx.send(ControlRequest::Resume).await;
    }

    /// Request a manual stop, ending the tracker run.
    pub async fn stop(&self) {
        let _ = self.tx.send(ControlRequest::Stop).await;
    }
}

/// The telemetry producer.
#[derive(Debug)]
pub struct Tracker {
    registry: Registry,
    pipeline: Pipeline,
    engine: CaptureEngine,
    commands: CommandChannel,
    sink: Arc<dyn EventSink>,
    silent: bool,
    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
}

impl Tracker {
    /// Assemble a tracker from its collaborators.
    ///
    /// In silent mode the duration counter is suppressed; classified
    /// capture failures still reach the sink, which decides their fate.
    #[must_use]
    pub fn new(
        registry: Registry,
        pipeline: Pipeline,
        engine: CaptureEngine,
        commands: CommandChannel,
        sink: Arc<dyn EventSink>,
        silent: bool,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            registry,
            pipeline,
            engine,
            commands,
            sink,
            silent,
            control_tx,
            control_rx,
        }
    }

    /// Get a control handle for manual pause/resume/stop.
    #[must_use]
    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Run the producer until the session stops.
    ///
    /// Begins a session under this device's stable user identifier, starts
    /// the capture stream, and submits every recorded sample. A stop —
    /// whether admin-issued through the command channel or manual through
    /// the handle — cancels capture, emits one final `session_end` sample,
    /// and returns the final session state.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry is unavailable at startup;
    /// every later failure is absorbed and reported through the sink.
    pub async fn run(self, mut make_source: SourceFactory) -> Result<TrackingSession> {
        let Self {
            registry,
            pipeline,
            engine,
            commands,
            sink,
            silent,
            control_tx,
            mut control_rx,
        } = self;
        // Held for the whole run so control receivers never observe a
        // closed channel.
        let _control_keepalive = control_tx;

        let user_id = registry.device_user_id()?;
        info!("starting tracking session for {user_id}");

        let mut session = TrackingSession::begin(user_id.clone(), Utc::now());
        let (mut capture_handle, rx) = engine.start(make_source(), Arc::clone(&sink));
        let mut samples = Some(rx);
        let mut commands_rx =
            Some(commands.subscribe(registry.clone(), user_id.clone(), Arc::clone(&sink)));

        let mut last_fix: Option<(f64, f64, Option<f64>)> = None;
        let mut duration_tick = tokio::time::interval(Duration::from_secs(1));
        duration_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        duration_tick.tick().await;

        loop {
            tokio::select! {
                sample = recv_sample(&mut samples) => match sample {
                    Some(sample) => {
                        last_fix = Some((sample.latitude, sample.longitude, sample.accuracy));
                        if session.record_sample(sample.captured_at).is_ok() {
                            pipeline.submit(&session, &sample).await;
                        }
                    }
                    None => {
                        // The stream closed: a pause or stop released it.
                        samples = None;
                        if session.state() == SessionState::Stopped {
                            break;
                        }
                    }
                },

                command = recv_command(&mut commands_rx) => match command {
                    Some(AdminCommand { kind: CommandKind::Stop, .. }) => {
                        if session.stop(Utc::now()).is_ok() {
                            capture_handle.stop();
                            let marker = LocationSample::session_end(Utc::now());
                            pipeline.submit(&session, &marker).await;
                            sink.emit(&TrackerEvent::SessionStopped {
                                user_id: user_id.clone(),
                            });
                        }
                        break;
                    }
                    // No consumer exists for resume/remove/custom commands;
                    // they only ever travel outward as telemetry.
                    Some(_) => {}
                    None => commands_rx = None,
                },

                control = control_rx.recv() => match control {
                    Some(ControlRequest::Pause) => {
                        if session.pause(Utc::now()).is_ok() {
                            debug!("pausing capture for {user_id}");
                            capture_handle.stop();
                            samples = None;
                            submit_transition_marker(
                                &pipeline,
                                &session,
                                last_fix,
                                SampleOrigin::ManualPauseResume,
                            )
                            .await;
                        }
                    }
                    Some(ControlRequest::Resume) => {
                        if session.resume(Utc::now()).is_ok() {
                            debug!("resuming capture for {user_id}");
                            let (handle, rx) = engine.start(make_source(), Arc::clone(&sink));
                            capture_handle = handle;
                            samples = Some(rx);
                            submit_transition_marker(
                                &pipeline,
                                &session,
                                last_fix,
                                SampleOrigin::ManualPauseResume,
                            )
                            .await;
                        }
                    }
                    Some(ControlRequest::Stop) => {
                        if session.stop(Utc::now()).is_ok() {
                            capture_handle.stop();
                            let marker = LocationSample::session_end(Utc::now());
                            pipeline.submit(&session, &marker).await;
                            sink.emit(&TrackerEvent::SessionStopped {
                                user_id: user_id.clone(),
                            });
                        }
                        break;
                    }
                    None => {}
                },

                _ = duration_tick.tick(), if !silent && session.is_active() => {
                    sink.emit(&TrackerEvent::DurationTick {
                        user_id: user_id.clone(),
                        seconds: session.duration_secs(Utc::now()),
                    });
                },
            }
        }

        info!("tracking session ended for {user_id}");
        Ok(session)
    }
}

/// Submit a state-transition marker at the last known position, if any fix
/// has been seen yet.
async fn submit_transition_marker(
    pipeline: &Pipeline,
    session: &TrackingSession,
    last_fix: Option<(f64, f64, Option<f64>)>,
    origin: SampleOrigin,
) {
    if let Some((latitude, longitude, accuracy)) = last_fix {
        let marker = LocationSample::new(latitude, longitude, accuracy, origin, Utc::now());
        pipeline.submit(session, &marker).await;
    }
}

async fn recv_sample(rx: &mut Option<mpsc::Receiver<LocationSample>>) -> Option<LocationSample> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_command(rx: &mut Option<mpsc::Receiver<AdminCommand>>) -> Option<AdminCommand> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FixOptions, RawFix, ReplaySource};
    use crate::enrich::Resolver;
    use crate::events::testing::CollectSink;
    use crate::pipeline::CollectorClient;
    use crate::sample::DeviceInfo;
    use crate::store::MemoryStore;

    fn fixes() -> Vec<RawFix> {
        vec![
            RawFix {
                latitude: 26.7795,
                longitude: 80.976,
                accuracy: Some(10.0),
            },
            RawFix {
                latitude: 26.78,
                longitude: 80.977,
                accuracy: Some(8.0),
            },
            RawFix {
                latitude: 26.7805,
                longitude: 80.978,
                accuracy: None,
            },
        ]
    }

    fn replay_factory(interval: Duration) -> SourceFactory {
        Box::new(move || Box::new(ReplaySource::new(fixes(), interval)))
    }

    fn build_tracker(
        poll_interval: Duration,
        sink: Arc<CollectSink>,
    ) -> (Tracker, Registry) {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let collector =
            CollectorClient::new("http://127.0.0.1:9/ingest", Duration::from_millis(100))
                .unwrap();
        let resolver =
            Resolver::new("http://127.0.0.1:9/reverse", Duration::from_millis(100)).unwrap();
        let pipeline = Pipeline::new(
            collector,
            resolver,
            registry.clone(),
            DeviceInfo::default(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        let engine = CaptureEngine::new(FixOptions {
            timeout: Duration::from_secs(2),
            ..FixOptions::default()
        });
        let commands = CommandChannel::new(poll_interval);
        let tracker = Tracker::new(
            registry.clone(),
            pipeline,
            engine,
            commands,
            sink as Arc<dyn EventSink>,
            true,
        );
        (tracker, registry)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_samples_recorded_then_stop_flag_honored() {
        let sink = Arc::new(CollectSink::new());
        let (tracker, registry) = build_tracker(Duration::from_millis(50), Arc::clone(&sink));
        let run = tokio::spawn(tracker.run(replay_factory(Duration::from_millis(10))));

        let user_id = registry.device_user_id().unwrap();

        // Wait until at least one sample landed in the registry.
        {
            let registry = registry.clone();
            let user_id = user_id.clone();
            wait_until(move || {
                registry
                    .record(&user_id)
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.is_active)
            })
            .await;
        }

        registry.request_stop(&user_id).unwrap();

        let session = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("tracker should stop within the poll latency bound")
            .expect("tracker task panicked")
            .expect("tracker run failed");

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.sample_count() >= 1);

        // The final session_end marker was the last registry write.
        let record = registry.record(&user_id).unwrap().unwrap();
        assert!(!record.is_active);
        assert_eq!(record.coordinates, "0.0000°, 0.0000°");

        // Exactly one stop, and the flag stays set.
        assert_eq!(
            sink.count_matching(|e| matches!(e, TrackerEvent::SessionStopped { .. })),
            1
        );
        assert!(registry.stop_requested(&user_id).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manual_pause_resume_and_stop() {
        let sink = Arc::new(CollectSink::new());
        let (tracker, registry) = build_tracker(Duration::from_secs(60), Arc::clone(&sink));
        let handle = tracker.handle();
        let run = tokio::spawn(tracker.run(replay_factory(Duration::from_millis(10))));

        let user_id = registry.device_user_id().unwrap();
        {
            let registry = registry.clone();
            let user_id = user_id.clone();
            wait_until(move || registry.record(&user_id).ok().flatten().is_some()).await;
        }

        handle.pause().await;
        {
            let registry = registry.clone();
            let user_id = user_id.clone();
            wait_until(move || {
                registry
                    .record(&user_id)
                    .ok()
                    .flatten()
                    .is_some_and(|r| !r.is_active)
            })
            .await;
        }

        handle.resume().await;
        {
            let registry = registry.clone();
            let user_id = user_id.clone();
            wait_until(move || {
                registry
                    .record(&user_id)
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.is_active)
            })
            .await;
        }

        handle.stop().await;
        let session = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("tracker should honor a manual stop")
            .expect("tracker task panicked")
            .expect("tracker run failed");

        assert_eq!(session.state(), SessionState::Stopped);

        // Session start survived every transition.
        let record = registry.record(&user_id).unwrap().unwrap();
        assert_eq!(record.session_start, session.session_start());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delivery_failures_do_not_stall_capture() {
        let sink = Arc::new(CollectSink::new());
        let (tracker, registry) = build_tracker(Duration::from_millis(50), Arc::clone(&sink));
        let run = tokio::spawn(tracker.run(replay_factory(Duration::from_millis(10))));

        let user_id = registry.device_user_id().unwrap();
        {
            let registry = registry.clone();
            let user_id = user_id.clone();
            // All three scripted fixes get recorded even though every
            // delivery and enrichment attempt fails.
            wait_until(move || {
                registry
                    .record(&user_id)
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.coordinates == "26.7805°, 80.9780°")
            })
            .await;
        }

        registry.request_stop(&user_id).unwrap();
        let session = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("tracker should stop")
            .expect("tracker task panicked")
            .expect("tracker run failed");

        assert_eq!(session.sample_count(), 3);
    }
}
