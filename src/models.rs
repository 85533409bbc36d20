//! Data model shared by the discovery pipeline and its consumers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// Netflix's own autonomous system (AS-SSI).
pub const NETFLIX_ASN: u32 = 2906;

/// Routing registry information for one IP address.
///
/// Every field is optional: a failed or partial whois lookup yields [AsnInfo::default],
/// which reads as "unknown" everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnInfo {
    /// origin AS number, without the `AS` prefix
    pub asn: Option<u32>,
    /// AS organization name, e.g. `NETFLIX-ASN - Netflix Streaming Services Inc., US`
    pub as_name: Option<String>,
    /// two-letter country code
    pub country: Option<String>,
    /// announced BGP prefix covering the address
    pub bgp_prefix: Option<String>,
    /// regional internet registry, e.g. `arin`
    pub registry: Option<String>,
    /// allocation date as reported by the registry
    pub allocated: Option<String>,
}

impl AsnInfo {
    pub fn is_known(&self) -> bool {
        self.asn.is_some()
    }
}

/// Network information of the host running the locator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// public IP address, absent if the lookup service was unreachable
    pub public_ip: Option<IpAddr>,
    pub asn: Option<u32>,
    pub isp: Option<String>,
    pub country: Option<String>,
    /// announced prefix in CIDR notation
    pub prefix: Option<String>,
}

impl NetworkInfo {
    pub fn new(public_ip: Option<IpAddr>, info: AsnInfo) -> Self {
        NetworkInfo {
            public_ip,
            asn: info.asn,
            isp: info.as_name,
            country: info.country,
            prefix: info.bgp_prefix,
        }
    }
}

/// One OCA returned by the speed-test API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcaCandidate {
    /// OCA hostname, e.g. `ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net`
    pub hostname: String,
    /// the speed-test URL the hostname was taken from
    pub url: String,
    /// the raw API entry, passed through untouched
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A best-effort geographic location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// human-readable label such as `Chicago, IL`
    pub city: Option<String>,
    pub country: Option<String>,
    /// three-letter airport code, upper case
    pub iata_code: Option<String>,
}

impl Location {
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// A location is usable if it carries coordinates, or both a city label and an IATA code.
    pub fn is_usable(&self) -> bool {
        self.has_coordinates() || (self.city.is_some() && self.iata_code.is_some())
    }
}

/// How the location of an OCA record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    /// primary provider answered for (hostname, ASN)
    PrimaryApi,
    /// primary provider answered after substituting Netflix's ASN
    PrimaryApiAsnFallback,
    /// primary provider answered for the PTR name of a NAT64 rendezvous address
    Nat64Ptr,
    /// place name extracted from the hostname and geocoded
    GenericGeocoding,
    Unresolved,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::PrimaryApi => "primary-api",
            ResolutionMethod::PrimaryApiAsnFallback => "primary-api-asn-fallback",
            ResolutionMethod::Nat64Ptr => "nat64-ptr",
            ResolutionMethod::GenericGeocoding => "generic-geocoding",
            ResolutionMethod::Unresolved => "unresolved",
        }
    }
}

impl Display for ResolutionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the location resolution engine for one hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub method: ResolutionMethod,
    pub location: Option<Location>,
    /// the hostname the caller asked about, set when a substitute name was resolved instead
    pub original_domain: Option<String>,
    /// PTR name used in place of the original hostname on the NAT64 path
    pub ptr_hostname: Option<String>,
}

impl Resolution {
    pub fn unresolved() -> Self {
        Resolution {
            method: ResolutionMethod::Unresolved,
            location: None,
            original_domain: None,
            ptr_hostname: None,
        }
    }

    pub(crate) fn found(method: ResolutionMethod, location: Location) -> Self {
        Resolution {
            method,
            location: Some(location),
            original_domain: None,
            ptr_hostname: None,
        }
    }
}

/// Final, fully assembled record for one OCA candidate.
///
/// `method` is always set; it reads `unresolved` when no location could be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcaRecord {
    pub hostname: String,
    pub url: String,
    /// resolved address, absent if forward DNS failed
    pub ip: Option<IpAddr>,
    pub asn: Option<u32>,
    /// network provider (AS name) operating the address
    pub isp: Option<String>,
    pub location: Option<Location>,
    pub method: ResolutionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl OcaRecord {
    pub fn assemble(
        candidate: OcaCandidate,
        ip: Option<IpAddr>,
        asn_info: AsnInfo,
        resolution: Resolution,
    ) -> Self {
        OcaRecord {
            hostname: candidate.hostname,
            url: candidate.url,
            ip,
            asn: asn_info.asn,
            isp: asn_info.as_name,
            location: resolution.location,
            method: resolution.method,
            original_domain: resolution.original_domain,
            ptr_hostname: resolution.ptr_hostname,
            metadata: candidate.metadata,
        }
    }

    /// Record for a candidate whose processing produced nothing (e.g. cancelled at the deadline).
    pub fn unresolved(candidate: OcaCandidate) -> Self {
        Self::assemble(candidate, None, AsnInfo::default(), Resolution::unresolved())
    }

    pub fn is_resolved(&self) -> bool {
        self.method != ResolutionMethod::Unresolved
    }

    pub fn city(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.city.as_deref())
    }

    pub fn iata_code(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.iata_code.as_deref())
    }
}

#[allow(clippy::unwrap_used)]
impl Display for OcaRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", serde_json::to_string(self).unwrap())
    }
}

/// Complete result of one locator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorResult {
    pub network: NetworkInfo,
    /// one record per candidate, in the order returned by the speed-test API
    pub records: Vec<OcaRecord>,
    pub query_time: DateTime<Utc>,
    #[serde(skip)]
    pub token: String,
}

impl LocatorResult {
    pub fn resolved_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_resolved()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> OcaCandidate {
        OcaCandidate {
            hostname: "ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net".to_string(),
            url: "https://ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net/speedtest".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&ResolutionMethod::PrimaryApiAsnFallback).unwrap();
        assert_eq!(json, "\"primary-api-asn-fallback\"");
        let json = serde_json::to_string(&ResolutionMethod::Nat64Ptr).unwrap();
        assert_eq!(json, "\"nat64-ptr\"");
        assert_eq!(ResolutionMethod::GenericGeocoding.to_string(), "generic-geocoding");
    }

    #[test]
    fn test_unresolved_record_keeps_method() {
        let record = OcaRecord::unresolved(candidate());
        assert_eq!(record.method, ResolutionMethod::Unresolved);
        assert!(!record.is_resolved());
        assert!(record.location.is_none());
        assert!(record.ip.is_none());

        let value: serde_json::Value = serde_json::from_str(&record.to_string()).unwrap();
        assert_eq!(value["method"], "unresolved");
        assert!(value.get("original_domain").is_none());
    }

    #[test]
    fn test_location_usable() {
        let mut location = Location {
            city: Some("Chicago, IL".to_string()),
            ..Default::default()
        };
        assert!(!location.is_usable());
        location.iata_code = Some("ORD".to_string());
        assert!(location.is_usable());

        let coords = Location {
            latitude: Some(41.97),
            longitude: Some(-87.90),
            ..Default::default()
        };
        assert!(coords.is_usable());
    }

    #[test]
    fn test_token_not_serialized() {
        let result = LocatorResult {
            network: NetworkInfo::default(),
            records: vec![OcaRecord::unresolved(candidate())],
            query_time: Utc::now(),
            token: "YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm".to_string(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("YXNkZmFzZGxmbnNkYWZoYXNkZmhrYWxm"));
        assert_eq!(result.resolved_count(), 0);
    }

    #[test]
    fn test_resolved_count() {
        let located = OcaRecord::assemble(
            candidate(),
            None,
            AsnInfo::default(),
            Resolution::found(
                ResolutionMethod::GenericGeocoding,
                Location {
                    city: Some("Chicago".to_string()),
                    iata_code: Some("ORD".to_string()),
                    ..Default::default()
                },
            ),
        );
        assert!(located.is_resolved());

        let result = LocatorResult {
            network: NetworkInfo::default(),
            records: vec![located, OcaRecord::unresolved(candidate())],
            query_time: Utc::now(),
            token: String::new(),
        };
        assert_eq!(result.resolved_count(), 1);
    }
}
