//! Location resolution engine.
//!
//! For each OCA the engine builds an ordered list of [Tier]s and tries them one after the
//! other until one yields a usable [Location]:
//!
//! | hostname      | address    | tiers                                                  |
//! |---------------|------------|--------------------------------------------------------|
//! | standard      | any        | primary, primary with AS2906 (unless already 2906), generic |
//! | `ipv6`-tagged | IPv4       | NAT64 PTR, generic                                     |
//! | `ipv6`-tagged | IPv6/none  | generic                                                |
//!
//! Every tier is bounded by its own timeout. Failures of individual providers only advance
//! to the next tier; the engine itself never fails and reports
//! [ResolutionMethod::Unresolved] when it runs out of tiers.
mod aleph;
mod classify;
mod geocode;

pub use aleph::{AlephLocationInfo, AlephProvider, AlephResponse, LocationProvider};
pub use classify::{is_ipv6_tagged, IpFamily};
pub use geocode::{
    builtin_location, extract_city_name, extract_iata_code, geocode_hostname,
    parse_nominatim_response, Geocoder, NominatimGeocoder,
};

use crate::config::GeocodingStrategy;
use crate::models::{Location, Resolution, ResolutionMethod, NETFLIX_ASN};
use crate::network::DnsLookup;
use crate::speedtest::RetryPolicy;
use crate::LocatorConfig;
use classify::valid_ptr_name;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One fallback step of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    PrimaryApi,
    NetflixAsnFallback,
    Nat64Ptr,
    GenericGeocoding,
}

impl Tier {
    fn uses_primary(&self) -> bool {
        !matches!(self, Tier::GenericGeocoding)
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::PrimaryApi => "primary-api",
            Tier::NetflixAsnFallback => "netflix-asn-fallback",
            Tier::Nat64Ptr => "nat64-ptr",
            Tier::GenericGeocoding => "generic-geocoding",
        };
        write!(f, "{}", s)
    }
}

/// Resolves OCA hostnames to locations through a fixed chain of fallback tiers.
#[derive(Clone)]
pub struct LocationEngine {
    primary: Arc<dyn LocationProvider>,
    geocoder: Arc<dyn Geocoder>,
    dns: Arc<dyn DnsLookup>,
    strategy: GeocodingStrategy,
    tier_timeout: Duration,
    ptr_timeout: Duration,
}

impl LocationEngine {
    pub fn new(
        primary: Arc<dyn LocationProvider>,
        geocoder: Arc<dyn Geocoder>,
        dns: Arc<dyn DnsLookup>,
        config: &LocatorConfig,
    ) -> Self {
        LocationEngine {
            primary,
            geocoder,
            dns,
            strategy: config.geocoding,
            tier_timeout: RetryPolicy::from_config(config).budget(config.request_timeout),
            ptr_timeout: config.ptr_timeout,
        }
    }

    /// Tiers that will be attempted for this input, in order.
    pub fn plan(&self, hostname: &str, ip: Option<&str>, asn: Option<u32>) -> Vec<Tier> {
        let family = ip.map(IpFamily::classify).unwrap_or(IpFamily::Unknown);
        let tiers = if is_ipv6_tagged(hostname) {
            match family {
                IpFamily::V4 => vec![Tier::Nat64Ptr, Tier::GenericGeocoding],
                IpFamily::V6 | IpFamily::Unknown => vec![Tier::GenericGeocoding],
            }
        } else if asn == Some(NETFLIX_ASN) {
            vec![Tier::PrimaryApi, Tier::GenericGeocoding]
        } else {
            vec![
                Tier::PrimaryApi,
                Tier::NetflixAsnFallback,
                Tier::GenericGeocoding,
            ]
        };

        tiers
            .into_iter()
            .filter(|tier| {
                if tier.uses_primary() {
                    self.strategy.uses_primary()
                } else {
                    self.strategy.uses_generic()
                }
            })
            .collect()
    }

    /// Resolve the location of `hostname`.
    ///
    /// * `ip`: the address the hostname resolved to, if any
    /// * `asn`: AS number to give the primary provider as context
    pub async fn resolve(&self, hostname: &str, ip: Option<&str>, asn: Option<u32>) -> Resolution {
        let plan = self.plan(hostname, ip, asn);
        debug!("{}: tiers {:?}", hostname, plan);

        for tier in plan {
            let resolution = match tier {
                Tier::PrimaryApi => self
                    .primary(hostname, asn, ip)
                    .await
                    .map(|l| Resolution::found(ResolutionMethod::PrimaryApi, l)),
                Tier::NetflixAsnFallback => self
                    .primary(hostname, Some(NETFLIX_ASN), ip)
                    .await
                    .map(|l| Resolution::found(ResolutionMethod::PrimaryApiAsnFallback, l)),
                Tier::Nat64Ptr => self.nat64(hostname, ip, asn).await,
                Tier::GenericGeocoding => self
                    .generic(hostname)
                    .await
                    .map(|l| Resolution::found(ResolutionMethod::GenericGeocoding, l)),
            };
            match resolution {
                Some(resolution) => {
                    info!("{} located via {}", hostname, resolution.method);
                    return resolution;
                }
                None => debug!("{}: tier {} gave no result", hostname, tier),
            }
        }

        warn!("{}: no location found", hostname);
        Resolution::unresolved()
    }

    async fn bounded<T, F>(&self, what: &str, limit: Duration, fut: F) -> Option<T>
    where
        F: Future<Output = Result<Option<T>, crate::LocatorError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!("{} failed: {}", what, e);
                None
            }
            Err(_) => {
                debug!("{} timed out after {}ms", what, limit.as_millis());
                None
            }
        }
    }

    async fn primary(&self, name: &str, asn: Option<u32>, ip: Option<&str>) -> Option<Location> {
        let what = format!("primary provider for {} (asn {:?})", name, asn);
        self.bounded(
            &what,
            self.tier_timeout,
            self.primary.locate(name, asn, ip),
        )
        .await
    }

    async fn ptr_name(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!("cannot reverse-resolve malformed address {}", ip);
                return None;
            }
        };
        let what = format!("PTR lookup of {}", ip);
        let name = self
            .bounded(&what, self.ptr_timeout, self.dns.reverse_lookup(addr))
            .await?;
        let valid = valid_ptr_name(&name);
        if valid.is_none() {
            debug!("ignoring invalid PTR name '{}' for {}", name, ip);
        }
        valid
    }

    async fn nat64(&self, hostname: &str, ip: Option<&str>, asn: Option<u32>) -> Option<Resolution> {
        let ip = ip?;
        let ptr = self.ptr_name(ip).await?;
        debug!("{}: NAT64 address {} has PTR {}", hostname, ip, ptr);

        let mut location = self.primary(&ptr, asn, Some(ip)).await;
        if location.is_none() && asn != Some(NETFLIX_ASN) {
            location = self.primary(&ptr, Some(NETFLIX_ASN), Some(ip)).await;
        }

        location.map(|location| Resolution {
            method: ResolutionMethod::Nat64Ptr,
            location: Some(location),
            original_domain: Some(hostname.to_string()),
            ptr_hostname: Some(ptr),
        })
    }

    async fn generic(&self, hostname: &str) -> Option<Location> {
        let what = format!("generic geocoding of {}", hostname);
        self.bounded(
            &what,
            self.tier_timeout,
            geocode_hostname(self.geocoder.as_ref(), hostname),
        )
        .await
    }
}
