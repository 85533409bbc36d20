//! Primary location provider: infers an OCA's location from its DNS name and ASN.
//!
//! The upstream service has served an expired certificate for long stretches, so its
//! client skips TLS verification. Nothing sensitive is sent: only public hostnames and ASNs.
use crate::config::USER_AGENT;
use crate::models::Location;
use crate::speedtest::common::{send_with_retry, RetryPolicy};
use crate::{LocatorConfig, LocatorError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Hostname-based location inference.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Locate `hostname` in the context of `asn`.
    ///
    /// `Ok(None)` is an explicit no-result; errors are transport or protocol failures.
    async fn locate(
        &self,
        hostname: &str,
        asn: Option<u32>,
        ip: Option<&str>,
    ) -> Result<Option<Location>, LocatorError>;
}

#[derive(Debug, Serialize)]
struct AlephQuery<'a> {
    ptr_record: &'a str,
    ip: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    asn: Option<u32>,
}

/// Response body of the query endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct AlephResponse {
    #[serde(default)]
    pub location_info: Option<AlephLocationInfo>,
    #[serde(default)]
    pub geo_hint: Option<String>,
    #[serde(default)]
    pub regular_expression: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlephLocationInfo {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

fn filled(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn as_iata(s: &str) -> Option<String> {
    (s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic())).then(|| s.to_ascii_uppercase())
}

impl AlephResponse {
    /// Convert into a [Location], or `None` if the response carries nothing usable.
    ///
    /// The IATA code comes from `geo_hint`, or failing that from the first capture group of
    /// `regular_expression` applied to the queried name.
    pub fn into_location(self, query: &str) -> Option<Location> {
        let info = self.location_info?;

        let city = match (filled(&info.city), filled(&info.state), filled(&info.region)) {
            (Some(city), Some(state), _) => Some(format!("{}, {}", city, state)),
            (Some(city), None, Some(region)) => Some(format!("{}, {}", city, region)),
            (Some(city), None, None) => Some(city.to_string()),
            (None, ..) => None,
        };

        let iata_code = filled(&self.geo_hint).and_then(as_iata).or_else(|| {
            let pattern = filled(&self.regular_expression)?;
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => {
                    debug!("ignoring invalid provider pattern {}: {}", pattern, e);
                    return None;
                }
            };
            let cap = re.captures(query)?;
            cap.get(1).and_then(|m| as_iata(m.as_str()))
        });

        let location = Location {
            latitude: info.latitude,
            longitude: info.longitude,
            city,
            country: filled(&info.country).map(|c| c.to_string()),
            iata_code,
        };
        location.is_usable().then_some(location)
    }
}

/// [LocationProvider] backed by TheAleph query API.
#[derive(Debug, Clone)]
pub struct AlephProvider {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl AlephProvider {
    pub fn new(config: &LocatorConfig) -> Result<Self, LocatorError> {
        let client = reqwest::ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(AlephProvider {
            client,
            url: config.aleph_api_url.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl LocationProvider for AlephProvider {
    async fn locate(
        &self,
        hostname: &str,
        asn: Option<u32>,
        ip: Option<&str>,
    ) -> Result<Option<Location>, LocatorError> {
        let query = AlephQuery {
            ptr_record: hostname,
            ip: ip.unwrap_or(""),
            asn,
        };
        debug!("primary provider query {:?}", query);

        let response = send_with_retry(&self.policy, &self.url, || {
            self.client
                .post(self.url.as_str())
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&query)
                .send()
        })
        .await?;

        let body: AlephResponse = response.json().await.map_err(|e| {
            warn!("unreadable primary provider response for {}: {}", hostname, e);
            LocatorError::InvalidResponse(format!("primary provider: {}", e))
        })?;
        let location = body.into_location(hostname);
        match &location {
            Some(l) => debug!(
                "primary provider located {} at {:?} ({:?})",
                hostname, l.city, l.iata_code
            ),
            None => debug!("primary provider has no location for {}", hostname),
        }
        Ok(location)
    }
}
