//! Configuration management for the OCA locator.
//!
//! This module provides a centralized configuration struct that loads settings
//! from environment variables (and a `.env` file, if present). All configuration is
//! loaded once at startup and can be displayed for logging purposes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::LocatorError;

/// Default values for request handling
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Default values for the pipeline
const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_DEADLINE_SECS: u64 = 120;
const DEFAULT_URL_COUNT: u32 = 5;
const DEFAULT_PTR_TIMEOUT_SECS: u64 = 3;

/// Default endpoints
const DEFAULT_FAST_COM_URL: &str = "https://fast.com";
const DEFAULT_SPEEDTEST_API_URL: &str = "https://api.fast.com/netflix/speedtest/v2";
const DEFAULT_ALEPH_API_URL: &str = "https://thealeph.ai/api/query";
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_WHOIS_SERVER: &str = "whois.cymru.com:43";
const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";

pub(crate) const USER_AGENT: &str = concat!("oca-locator/", env!("CARGO_PKG_VERSION"));

/// Which location providers the engine may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum GeocodingStrategy {
    /// Primary inference provider only (including the Netflix-ASN retry and NAT64 handling).
    Primary,
    /// Hostname place-name extraction and generic geocoding only.
    Generic,
    /// Primary provider first, generic geocoding as the last tier.
    #[default]
    Hybrid,
}

impl GeocodingStrategy {
    pub fn uses_primary(&self) -> bool {
        matches!(self, GeocodingStrategy::Primary | GeocodingStrategy::Hybrid)
    }

    pub fn uses_generic(&self) -> bool {
        matches!(self, GeocodingStrategy::Generic | GeocodingStrategy::Hybrid)
    }
}

impl FromStr for GeocodingStrategy {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "aleph" => Ok(GeocodingStrategy::Primary),
            "generic" | "geopy" | "nominatim" => Ok(GeocodingStrategy::Generic),
            "hybrid" => Ok(GeocodingStrategy::Hybrid),
            other => Err(LocatorError::ConfigError(format!(
                "unknown geocoding strategy '{}', expected primary, generic or hybrid",
                other
            ))),
        }
    }
}

impl fmt::Display for GeocodingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GeocodingStrategy::Primary => "primary",
            GeocodingStrategy::Generic => "generic",
            GeocodingStrategy::Hybrid => "hybrid",
        };
        write!(f, "{}", s)
    }
}

/// Complete locator configuration.
///
/// Main environment variables, each with a default value:
///
/// - `OCA_LOCATOR_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
/// - `OCA_LOCATOR_MAX_RETRIES`: attempts for retryable HTTP calls (default: 3)
/// - `OCA_LOCATOR_BACKOFF_MS`: initial backoff, doubled on each retry (default: 1000)
/// - `OCA_LOCATOR_CONCURRENCY`: candidates processed in parallel (default: 8)
/// - `OCA_LOCATOR_DEADLINE_SECS`: overall run deadline (default: 120)
/// - `OCA_LOCATOR_URL_COUNT`: number of OCA URLs requested from fast.com (default: 5)
/// - `OCA_LOCATOR_PTR_TIMEOUT_SECS`: reverse DNS timeout on the NAT64 path (default: 3)
/// - `OCA_LOCATOR_GEOCODING`: `primary`, `generic` or `hybrid` (default: `hybrid`)
/// - `OCA_LOCATOR_LOOKUP_OCA_ASN`: whether to run a whois lookup per OCA (default: true)
///
/// Endpoint overrides: `OCA_LOCATOR_FAST_COM_URL`, `OCA_LOCATOR_SCRIPT_URL`,
/// `OCA_LOCATOR_SPEEDTEST_API_URL`, `OCA_LOCATOR_ALEPH_API_URL`,
/// `OCA_LOCATOR_NOMINATIM_URL`, `OCA_LOCATOR_WHOIS_SERVER`, `OCA_LOCATOR_PUBLIC_IP_URL`.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
    pub deadline: Duration,
    pub url_count: u32,
    pub ptr_timeout: Duration,
    pub geocoding: GeocodingStrategy,
    pub lookup_oca_asn: bool,

    /// fast.com homepage, used to discover the script carrying the token
    pub fast_com_url: String,
    /// explicit script URL; skips homepage discovery when set
    pub script_url: Option<String>,
    pub speedtest_api_url: String,
    pub aleph_api_url: String,
    pub nominatim_url: String,
    /// `host:port` of the bulk whois service
    pub whois_server: String,
    pub public_ip_url: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_MS,
            concurrency: DEFAULT_CONCURRENCY,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            url_count: DEFAULT_URL_COUNT,
            ptr_timeout: Duration::from_secs(DEFAULT_PTR_TIMEOUT_SECS),
            geocoding: GeocodingStrategy::default(),
            lookup_oca_asn: true,
            fast_com_url: DEFAULT_FAST_COM_URL.to_string(),
            script_url: None,
            speedtest_api_url: DEFAULT_SPEEDTEST_API_URL.to_string(),
            aleph_api_url: DEFAULT_ALEPH_API_URL.to_string(),
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            whois_server: DEFAULT_WHOIS_SERVER.to_string(),
            public_ip_url: DEFAULT_PUBLIC_IP_URL.to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    dotenvy::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    dotenvy::var(key)
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl LocatorConfig {
    /// Create a new LocatorConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all configuration from environment variables.
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self {
            request_timeout: Duration::from_secs(env_parse(
                "OCA_LOCATOR_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            max_retries: env_parse("OCA_LOCATOR_MAX_RETRIES", DEFAULT_MAX_RETRIES).max(1),
            backoff_ms: env_parse("OCA_LOCATOR_BACKOFF_MS", DEFAULT_BACKOFF_MS),
            concurrency: env_parse("OCA_LOCATOR_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            deadline: Duration::from_secs(env_parse(
                "OCA_LOCATOR_DEADLINE_SECS",
                DEFAULT_DEADLINE_SECS,
            )),
            url_count: env_parse("OCA_LOCATOR_URL_COUNT", DEFAULT_URL_COUNT).max(1),
            ptr_timeout: Duration::from_secs(env_parse(
                "OCA_LOCATOR_PTR_TIMEOUT_SECS",
                DEFAULT_PTR_TIMEOUT_SECS,
            )),
            geocoding: env_parse("OCA_LOCATOR_GEOCODING", GeocodingStrategy::default()),
            lookup_oca_asn: env_parse("OCA_LOCATOR_LOOKUP_OCA_ASN", true),
            fast_com_url: env_string("OCA_LOCATOR_FAST_COM_URL", DEFAULT_FAST_COM_URL),
            script_url: dotenvy::var("OCA_LOCATOR_SCRIPT_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            speedtest_api_url: env_string(
                "OCA_LOCATOR_SPEEDTEST_API_URL",
                DEFAULT_SPEEDTEST_API_URL,
            ),
            aleph_api_url: env_string("OCA_LOCATOR_ALEPH_API_URL", DEFAULT_ALEPH_API_URL),
            nominatim_url: env_string("OCA_LOCATOR_NOMINATIM_URL", DEFAULT_NOMINATIM_URL),
            whois_server: env_string("OCA_LOCATOR_WHOIS_SERVER", DEFAULT_WHOIS_SERVER),
            public_ip_url: env_string("OCA_LOCATOR_PUBLIC_IP_URL", DEFAULT_PUBLIC_IP_URL),
        }
    }

    /// Build the shared HTTP client used by every component except the primary
    /// location provider.
    pub fn http_client(&self) -> Result<reqwest::Client, LocatorError> {
        Ok(reqwest::ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(self.request_timeout)
            .build()?)
    }

    /// Display configuration summary for logging.
    ///
    /// Returns a vector of log lines suitable for info-level logging.
    pub fn display_summary(&self) -> Vec<String> {
        let mut lines = Vec::new();

        lines.push("=== OCA Locator Configuration ===".to_string());
        lines.push(format!("Requests: {}", self));
        lines.push(format!(
            "Pipeline: concurrency={}, deadline={}s, url_count={}",
            self.concurrency,
            self.deadline.as_secs(),
            self.url_count
        ));

        match &self.script_url {
            Some(url) => lines.push(format!("Token script: {} (fixed)", url)),
            None => lines.push(format!(
                "Token script: discovered from {}",
                self.fast_com_url
            )),
        }
        lines.push(format!("Speedtest API: {}", self.speedtest_api_url));

        let mut geocoding = format!("Geocoding: {}", self.geocoding);
        if self.geocoding.uses_primary() {
            geocoding.push_str(&format!(" (primary: {})", self.aleph_api_url));
        }
        if self.geocoding.uses_generic() {
            geocoding.push_str(&format!(" (generic: {})", self.nominatim_url));
        }
        lines.push(geocoding);

        if self.lookup_oca_asn {
            lines.push(format!("OCA ASN lookup: ENABLED ({})", self.whois_server));
        } else {
            lines.push("OCA ASN lookup: DISABLED".to_string());
        }
        lines.push(format!("Public IP service: {}", self.public_ip_url));

        lines.push("=================================".to_string());

        lines
    }
}

impl fmt::Display for LocatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeout={}s, max_retries={}, backoff_ms={}, ptr_timeout={}s",
            self.request_timeout.as_secs(),
            self.max_retries,
            self.backoff_ms,
            self.ptr_timeout.as_secs()
        )
    }
}
