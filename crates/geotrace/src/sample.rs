//! Core sample types for geotrace.
//!
//! This module defines the fundamental data structures for representing
//! position fixes and the optional place data attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label used when no enrichment could be resolved for a sample.
pub const UNRESOLVED_LOCATION: &str = "Location data unavailable";

/// How a sample entered the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrigin {
    /// The immediate fix requested when tracking begins.
    InitialFix,
    /// A fix delivered by the continuous watch stream.
    Continuous,
    /// A marker emitted on a manual pause or resume.
    ManualPauseResume,
    /// The final marker emitted when a session stops.
    SessionEnd,
}

impl std::fmt::Display for SampleOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitialFix => write!(f, "initial_fix"),
            Self::Continuous => write!(f, "continuous"),
            Self::ManualPauseResume => write!(f, "manual_pause_resume"),
            Self::SessionEnd => write!(f, "session_end"),
        }
    }
}

/// A single immutable position reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Latitude in signed decimal degrees.
    pub latitude: f64,

    /// Longitude in signed decimal degrees.
    pub longitude: f64,

    /// Estimated accuracy radius in meters, when the source reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// When the fix was captured (assigned at capture time, not submission).
    pub captured_at: DateTime<Utc>,

    /// How this sample entered the stream.
    pub origin: SampleOrigin,
}

impl LocationSample {
    /// Create a new sample.
    #[must_use]
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        origin: SampleOrigin,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
            origin,
        }
    }

    /// Create the final marker sample emitted when a session ends.
    ///
    /// Carries zeroed coordinates; the collector keys off the origin tag.
    #[must_use]
    pub fn session_end(captured_at: DateTime<Utc>) -> Self {
        Self::new(0.0, 0.0, None, SampleOrigin::SessionEnd, captured_at)
    }

    /// Coordinates formatted for the admin view (`"26.7795°, 80.9760°"`).
    #[must_use]
    pub fn coordinates_display(&self) -> String {
        format!("{:.4}°, {:.4}°", self.latitude, self.longitude)
    }

    /// Coordinates formatted for the telemetry payload (six decimals).
    #[must_use]
    pub fn coordinates_precise(&self) -> String {
        format!("{:.6}°, {:.6}°", self.latitude, self.longitude)
    }

    /// Deep link to the fix on Google Maps.
    #[must_use]
    pub fn google_maps_link(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}&z=15",
            self.latitude, self.longitude
        )
    }

    /// Deep link to the fix on OpenStreetMap.
    #[must_use]
    pub fn osm_link(&self) -> String {
        format!(
            "https://www.openstreetmap.org/?mlat={}&mlon={}&zoom=15",
            self.latitude, self.longitude
        )
    }
}

/// Optional human-readable place data attached to a sample.
///
/// Produced by a best-effort reverse lookup; absence is a valid state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Country name.
    pub country: Option<String>,

    /// State or region name.
    pub region: Option<String>,

    /// City, town, or village name.
    pub locality: Option<String>,

    /// Full display address as returned by the lookup service.
    pub display_address: Option<String>,
}

impl Enrichment {
    /// Render the admin-facing place label, e.g. `"Lucknow, Uttar Pradesh, India"`.
    ///
    /// A missing locality is rendered as `"Unknown"`; empty parts are skipped.
    #[must_use]
    pub fn location_label(&self) -> String {
        let mut label = self
            .locality
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        for part in [&self.region, &self.country] {
            if let Some(value) = part {
                if !value.is_empty() {
                    label.push_str(", ");
                    label.push_str(value);
                }
            }
        }
        label
    }

    /// Check whether the lookup produced any usable field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.region.is_none()
            && self.locality.is_none()
            && self.display_address.is_none()
    }
}

/// Descriptors of the device emitting telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Short human-readable descriptor shown in the admin view.
    pub descriptor: String,

    /// Full agent string sent with each submission.
    pub user_agent: String,

    /// Reported display resolution.
    pub screen_resolution: String,

    /// Preferred language tag.
    pub language: String,

    /// IANA timezone name.
    pub timezone: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        let version = env!("CARGO_PKG_VERSION");
        Self {
            descriptor: format!("geotrk on {}", std::env::consts::OS),
            user_agent: format!("geotrk/{version}"),
            screen_resolution: "headless".to_string(),
            language: std::env::var("LANG")
                .ok()
                .and_then(|lang| lang.split('.').next().map(str::to_string))
                .filter(|lang| !lang.is_empty())
                .unwrap_or_else(|| "en-US".to_string()),
            timezone: std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string()),
        }
    }
}
