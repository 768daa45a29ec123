//! Best-effort reverse geocoding.
//!
//! One lookup per sample, no retry. Any failure (network, timeout, parse,
//! unexpected shape) degrades to "no enrichment" and is reported through
//! the event sink; the sample is recorded either way.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::events::{EventSink, TrackerEvent};
use crate::sample::Enrichment;

/// Reverse-geocoding client.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: reqwest::Client,
    endpoint: String,
}

/// Response shape of a Nominatim-style reverse lookup.
#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    address: Option<ReverseAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct ReverseAddress {
    country: Option<String>,
    state: Option<String>,
    region: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl Resolver {
    /// Create a resolver against the given endpoint.
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

    /// Look up place data for a coordinate.
    ///
    /// Returns `None` on any failure; never blocks the sample from being
    /// recorded and never retries.
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        sink: &dyn EventSink,
    ) -> Option<Enrichment> {
        match self.lookup(latitude, longitude).await {
            Ok(Some(enrichment)) => Some(enrichment),
            Ok(None) => {
                sink.emit(&TrackerEvent::EnrichmentUnavailable {
                    reason: "response carried no address".to_string(),
                });
                None
            }
            Err(err) => {
                sink.emit(&TrackerEvent::EnrichmentUnavailable {
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> std::result::Result<Option<Enrichment>, reqwest::Error> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "json".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: ReverseResponse = response.json().await?;
        Ok(enrichment_from_response(body))
    }
}

/// Map a reverse-lookup response onto an [`Enrichment`].
///
/// Returns `None` when the response carries no address object; the locality
/// falls back city → town → village, the region state → region.
fn enrichment_from_response(response: ReverseResponse) -> Option<Enrichment> {
    let address = response.address?;
    Some(Enrichment {
        country: non_empty(address.country),
        region: non_empty(address.state).or_else(|| non_empty(address.region)),
        locality: non_empty(address.city)
            .or_else(|| non_empty(address.town))
            .or_else(|| non_empty(address.village)),
        display_address: non_empty(response.display_name),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::CollectSink;

    fn parse(raw: &str) -> Option<Enrichment> {
        enrichment_from_response(serde_json::from_str(raw).expect("valid test json"))
    }

    #[test]
    fn test_full_response_maps_all_fields() {
        let enrichment = parse(
            r#"{
                "display_name": "Lucknow, Uttar Pradesh, India",
                "address": {
                    "city": "Lucknow",
                    "state": "Uttar Pradesh",
                    "country": "India"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(enrichment.locality.as_deref(), Some("Lucknow"));
        assert_eq!(enrichment.region.as_deref(), Some("Uttar Pradesh"));
        assert_eq!(enrichment.country.as_deref(), Some("India"));
        assert_eq!(
            enrichment.location_label(),
            "Lucknow, Uttar Pradesh, India"
        );
    }

    #[test]
    fn test_locality_falls_back_to_town_then_village() {
        let town = parse(r#"{"address": {"town": "Greenfield", "country": "USA"}}"#).unwrap();
        assert_eq!(town.locality.as_deref(), Some("Greenfield"));

        let village = parse(r#"{"address": {"village": "Oberdorf", "country": "Austria"}}"#)
            .unwrap();
        assert_eq!(village.locality.as_deref(), Some("Oberdorf"));
    }

    #[test]
    fn test_region_falls_back_to_region_field() {
        let enrichment =
            parse(r#"{"address": {"region": "Tuscany", "country": "Italy"}}"#).unwrap();
        assert_eq!(enrichment.region.as_deref(), Some("Tuscany"));
    }

    #[test]
    fn test_missing_address_yields_none() {
        assert!(parse(r#"{"display_name": "somewhere"}"#).is_none());
        assert!(parse("{}").is_none());
    }

    #[test]
    fn test_empty_strings_are_dropped() {
        let enrichment = parse(r#"{"address": {"city": "", "country": "India"}}"#).unwrap();
        assert!(enrichment.locality.is_none());
        assert_eq!(enrichment.country.as_deref(), Some("India"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let enrichment = parse(
            r#"{"address": {"city": "Delhi", "country": "India", "postcode": "110001"}}"#,
        )
        .unwrap();
        assert_eq!(enrichment.locality.as_deref(), Some("Delhi"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades_to_none() {
        let resolver = Resolver::new(
            "http://127.0.0.1:9/reverse",
            Duration::from_millis(200),
        )
        .unwrap();
        let sink = CollectSink::new();

        let result = resolver.resolve(26.7795, 80.976, &sink).await;
        assert!(result.is_none());
        assert_eq!(
            sink.count_matching(|e| matches!(e, TrackerEvent::EnrichmentUnavailable { .. })),
            1
        );
    }
}
