//! Generic fallback: pull a place name out of a hostname and geocode it.
//!
//! Airport codes are looked up in a built-in table of common OCA sites first; anything
//! else goes to a Nominatim-compatible search endpoint.
use crate::models::Location;
use crate::speedtest::common::{send_with_retry, RetryPolicy};
use crate::{LocatorConfig, LocatorError};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Free-text place name geocoding.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<Location>, LocatorError>;
}

/// Three-letter tokens that appear in OCA hostnames but are not airports.
const IATA_STOP_LIST: [&str; 10] = [
    "oca", "dev", "net", "com", "org", "nfl", "cdn", "www", "isp", "ipv",
];
const CITY_STOP_LIST: [&str; 5] = ["cdn", "edge", "cache", "pop", "dc"];
const MIN_CITY_LEN: usize = 4;

#[derive(Debug, Clone, Deserialize)]
struct Airport {
    city: String,
    country: String,
    latitude: f64,
    longitude: f64,
}

lazy_static! {
    static ref IATA_PATTERNS: Vec<Regex> = [
        // ipv4-c001-ord001-ix.1.oca.nflxvideo.net
        r"-([a-z]{3})\d{3}-",
        // .lax1. or .ord.
        r"\.([a-z]{3})\d*\.",
        // -lax-
        r"-([a-z]{3})-",
        // lax1.example.net
        r"^([a-z]{3})\d*\.",
        // example.lax
        r"\.([a-z]{3})$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid regex pattern"))
    .collect();
    static ref CITY_PATTERNS: Vec<Regex> = [
        // .seattle-dc.
        r"\.([a-z]+)-dc\.",
        // .seattlepop.
        r"\.([a-z]+)pop\.",
        // -seattle1.
        r"-([a-z]+)\d*\.",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid regex pattern"))
    .collect();
    static ref BUILTIN_AIRPORTS: HashMap<String, Airport> = serde_json::from_str(
        r#"
{
  "lax": {"city": "Los Angeles, CA", "country": "US", "latitude": 33.9425, "longitude": -118.4081},
  "ord": {"city": "Chicago, IL", "country": "US", "latitude": 41.9742, "longitude": -87.9073},
  "atl": {"city": "Atlanta, GA", "country": "US", "latitude": 33.6407, "longitude": -84.4277},
  "dfw": {"city": "Dallas, TX", "country": "US", "latitude": 32.8998, "longitude": -97.0403},
  "den": {"city": "Denver, CO", "country": "US", "latitude": 39.8561, "longitude": -104.6737},
  "jfk": {"city": "New York, NY", "country": "US", "latitude": 40.6413, "longitude": -73.7781},
  "sfo": {"city": "San Francisco, CA", "country": "US", "latitude": 37.6213, "longitude": -122.3790},
  "sea": {"city": "Seattle, WA", "country": "US", "latitude": 47.4502, "longitude": -122.3088},
  "mia": {"city": "Miami, FL", "country": "US", "latitude": 25.7959, "longitude": -80.2870},
  "bos": {"city": "Boston, MA", "country": "US", "latitude": 42.3656, "longitude": -71.0096},
  "phx": {"city": "Phoenix, AZ", "country": "US", "latitude": 33.4352, "longitude": -112.0101},
  "las": {"city": "Las Vegas, NV", "country": "US", "latitude": 36.0840, "longitude": -115.1537},
  "iad": {"city": "Washington, DC", "country": "US", "latitude": 38.9531, "longitude": -77.4565},
  "ams": {"city": "Amsterdam", "country": "NL", "latitude": 52.3105, "longitude": 4.7683},
  "lhr": {"city": "London", "country": "GB", "latitude": 51.4700, "longitude": -0.4543},
  "cdg": {"city": "Paris", "country": "FR", "latitude": 49.0097, "longitude": 2.5479},
  "fra": {"city": "Frankfurt", "country": "DE", "latitude": 50.0379, "longitude": 8.5622},
  "nrt": {"city": "Tokyo", "country": "JP", "latitude": 35.7720, "longitude": 140.3929},
  "sin": {"city": "Singapore", "country": "SG", "latitude": 1.3644, "longitude": 103.9915},
  "syd": {"city": "Sydney", "country": "AU", "latitude": -33.9399, "longitude": 151.1753},
  "gru": {"city": "São Paulo", "country": "BR", "latitude": -23.4356, "longitude": -46.4731},
  "mex": {"city": "Mexico City", "country": "MX", "latitude": 19.4363, "longitude": -99.0721},
  "yyz": {"city": "Toronto", "country": "CA", "latitude": 43.6777, "longitude": -79.6248}
}
"#
    )
    .expect("invalid built-in airport table");
}

/// Find an airport code in a hostname.
pub fn extract_iata_code(hostname: &str) -> Option<String> {
    let hostname = hostname.to_ascii_lowercase();
    IATA_PATTERNS.iter().find_map(|re| {
        re.captures_iter(&hostname)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str())
            .find(|code| !IATA_STOP_LIST.contains(code))
            .map(|code| code.to_string())
    })
}

/// Find a spelled-out city name in a hostname.
pub fn extract_city_name(hostname: &str) -> Option<String> {
    let hostname = hostname.to_ascii_lowercase();
    CITY_PATTERNS.iter().find_map(|re| {
        re.captures_iter(&hostname)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str())
            .find(|city| city.len() >= MIN_CITY_LEN && !CITY_STOP_LIST.contains(city))
            .map(|city| city.to_string())
    })
}

/// Location of a well-known airport, without any network access.
pub fn builtin_location(iata: &str) -> Option<Location> {
    let code = iata.to_ascii_lowercase();
    BUILTIN_AIRPORTS.get(&code).map(|airport| Location {
        latitude: Some(airport.latitude),
        longitude: Some(airport.longitude),
        city: Some(airport.city.clone()),
        country: Some(airport.country.clone()),
        iata_code: Some(code.to_ascii_uppercase()),
    })
}

/// Locate a hostname from the place name embedded in it.
///
/// An airport code is tried against the built-in table, then as `"<IATA> airport"`; a
/// spelled-out city name is tried last. Returns `Ok(None)` when nothing matches.
pub async fn geocode_hostname(
    geocoder: &dyn Geocoder,
    hostname: &str,
) -> Result<Option<Location>, LocatorError> {
    if let Some(code) = extract_iata_code(hostname) {
        if let Some(location) = builtin_location(&code) {
            debug!("{} matched built-in airport {}", hostname, code);
            return Ok(Some(location));
        }
        let code = code.to_ascii_uppercase();
        match geocoder.geocode(&format!("{} airport", code)).await {
            Ok(Some(location)) => {
                return Ok(Some(Location {
                    iata_code: Some(code),
                    ..location
                }))
            }
            Ok(None) => debug!("no geocoder match for airport {}", code),
            Err(e) => debug!("geocoding airport {} failed: {}", code, e),
        }
    }

    match extract_city_name(hostname) {
        Some(city) => geocoder.geocode(&city).await,
        None => {
            debug!("no usable place name in {}", hostname);
            Ok(None)
        }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

impl NominatimPlace {
    fn into_location(self) -> Option<Location> {
        let latitude = self.lat.parse::<f64>().ok()?;
        let longitude = self.lon.parse::<f64>().ok()?;
        let parts: Vec<&str> = self
            .display_name
            .split(',')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        let city = match parts.len() {
            0 => None,
            1 => Some(parts[0].to_string()),
            _ => Some(format!("{}, {}", parts[0], parts[1])),
        };
        Some(Location {
            latitude: Some(latitude),
            longitude: Some(longitude),
            city,
            country: (parts.len() > 2).then(|| parts[parts.len() - 1].to_string()),
            iata_code: None,
        })
    }
}

/// Parse a Nominatim search response, keeping the first hit.
pub fn parse_nominatim_response(body: &str) -> Result<Option<Location>, LocatorError> {
    let places: Vec<NominatimPlace> = serde_json::from_str(body)
        .map_err(|e| LocatorError::GeocodingError(format!("unreadable geocoder response: {}", e)))?;
    Ok(places.into_iter().next().and_then(|p| p.into_location()))
}

/// [Geocoder] backed by OpenStreetMap Nominatim.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl NominatimGeocoder {
    pub fn new(config: &LocatorConfig) -> Result<Self, LocatorError> {
        Ok(NominatimGeocoder {
            client: config.http_client()?,
            url: config.nominatim_url.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Location>, LocatorError> {
        debug!("geocoding '{}'", query);
        let response = send_with_retry(&self.policy, &self.url, || {
            self.client
                .get(self.url.as_str())
                .query(&[("q", query), ("format", "json"), ("limit", "1")])
                .send()
        })
        .await?;
        let body = response.text().await?;
        parse_nominatim_response(&body)
    }
}
