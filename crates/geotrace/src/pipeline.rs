//! Telemetry submission pipeline.
//!
//! Packages a sample (plus optional enrichment) into the form-encoded
//! collector payload, merges the freshest state into the local registry,
//! and performs one fire-and-forget delivery. The registry update is
//! synchronous and independent of the network outcome, so the admin view
//! reflects the latest known sample even when the collector never receives
//! it. Delivery failures are absorbed: no retry, no queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::enrich::Resolver;
use crate::error::Result;
use crate::events::{EventSink, TrackerEvent};
use crate::registry::Registry;
use crate::sample::{DeviceInfo, Enrichment, LocationSample, UNRESOLVED_LOCATION};
use crate::session::{SessionState, TrackedUserRecord, TrackingSession};

/// Fire-and-forget HTTP client for the remote collector.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: reqwest::Client,
    endpoint: String,
}

impl CollectorClient {
    /// Create a client against the given collector endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver a form-encoded payload, fire-and-forget.
    ///
    /// Spawns the request and returns immediately; the outcome is reported
    /// to the sink and never retried. In-flight deliveries are never
    /// cancelled.
    pub fn deliver(
        &self,
        user_id: impl Into<String>,
        fields: Vec<(String, String)>,
        sink: Arc<dyn EventSink>,
    ) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let user_id = user_id.into();

        tokio::spawn(async move {
            let outcome = client
                .post(&endpoint)
                .header("Accept", "application/json")
                .form(&fields)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);

            match outcome {
                Ok(_) => debug!("delivered telemetry for {user_id}"),
                Err(err) => sink.emit(&TrackerEvent::DeliveryFailed {
                    user_id,
                    reason: err.to_string(),
                }),
            }
        });
    }
}

/// The telemetry submission pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    collector: CollectorClient,
    resolver: Resolver,
    registry: Registry,
    device: DeviceInfo,
    sink: Arc<dyn EventSink>,
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        collector: CollectorClient,
        resolver: Resolver,
        registry: Registry,
        device: DeviceInfo,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            collector,
            resolver,
            registry,
            device,
            sink,
        }
    }

    /// Submit one sample for a session.
    ///
    /// Resolves enrichment (best-effort), merges the registry record
    /// synchronously, then spawns the collector delivery. Every failure
    /// along the way is absorbed and reported through the sink; capture
    /// must never stall on this path.
    pub async fn submit(&self, session: &TrackingSession, sample: &LocationSample) {
        let enrichment = self
            .resolver
            .resolve(sample.latitude, sample.longitude, &*self.sink)
            .await;

        self.update_registry(session, sample, enrichment.as_ref());

        let fields = telemetry_fields(session, sample, enrichment.as_ref(), &self.device);
        self.collector
            .deliver(session.user_id(), fields, Arc::clone(&self.sink));
    }

    /// Merge the freshest sample into the registry, independent of delivery.
    fn update_registry(
        &self,
        session: &TrackingSession,
        sample: &LocationSample,
        enrichment: Option<&Enrichment>,
    ) {
        let record = TrackedUserRecord {
            user_id: session.user_id().to_string(),
            last_seen: sample.captured_at,
            location_label: enrichment
                .map_or_else(|| UNRESOLVED_LOCATION.to_string(), Enrichment::location_label),
            coordinates: sample.coordinates_display(),
            tracking_duration_seconds: session.duration_secs(sample.captured_at),
            is_active: session.is_active(),
            device_info: self.device.descriptor.clone(),
            session_start: session.session_start(),
        };

        if let Err(err) = self.registry.upsert_record(record) {
            self.sink.emit(&TrackerEvent::StoreUnavailable {
                operation: "upsert_record",
                reason: err.to_string(),
            });
        }
    }
}

/// Build the form-encoded collector payload for one sample.
#[must_use]
pub fn telemetry_fields(
    session: &TrackingSession,
    sample: &LocationSample,
    enrichment: Option<&Enrichment>,
    device: &DeviceInfo,
) -> Vec<(String, String)> {
    let mut fields = vec![
        ("user_id".to_string(), session.user_id().to_string()),
        (
            "tracking_session_id".to_string(),
            format!(
                "{}_{}",
                session.user_id(),
                sample.captured_at.timestamp_millis()
            ),
        ),
        ("latitude".to_string(), sample.latitude.to_string()),
        ("longitude".to_string(), sample.longitude.to_string()),
        ("timestamp".to_string(), sample.captured_at.to_rfc3339()),
        ("tracking_type".to_string(), sample.origin.to_string()),
        ("map_link_google".to_string(), sample.google_maps_link()),
        ("map_link_osm".to_string(), sample.osm_link()),
        (
            "tracking_status".to_string(),
            tracking_status(session.state()).to_string(),
        ),
        (
            "session_duration".to_string(),
            session.duration_secs(sample.captured_at).to_string(),
        ),
        (
            "sample_count".to_string(),
            session.sample_count().to_string(),
        ),
        (
            "formatted_coordinates".to_string(),
            sample.coordinates_precise(),
        ),
        (
            "readable_time".to_string(),
            sample
                .captured_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string(),
        ),
        ("user_agent".to_string(), device.user_agent.clone()),
        (
            "screen_resolution".to_string(),
            device.screen_resolution.clone(),
        ),
        ("browser_language".to_string(), device.language.clone()),
        ("timezone".to_string(), device.timezone.clone()),
    ];

    if let Some(accuracy) = sample.accuracy {
        fields.push(("accuracy".to_string(), accuracy.to_string()));
    }

    if let Some(enrichment) = enrichment {
        fields.push((
            "country".to_string(),
            enrichment.country.clone().unwrap_or_default(),
        ));
        fields.push((
            "state".to_string(),
            enrichment.region.clone().unwrap_or_default(),
        ));
        fields.push((
            "city".to_string(),
            enrichment.locality.clone().unwrap_or_default(),
        ));
        fields.push((
            "address_full".to_string(),
            enrichment.display_address.clone().unwrap_or_default(),
        ));
    }

    fields
}

fn tracking_status(state: SessionState) -> &'static str {
    match state {
        SessionState::Active => "active",
        SessionState::Paused => "paused",
        SessionState::Stopped | SessionState::Removed => "stopped",
    }
}
