/*!
# Overview

[oca-locator][crate] finds the Netflix Open Connect Appliances (OCAs) that would serve the
current network, and works out where each of them is.

A run goes through these stages:
1. describe the local network (public IP, ASN, ISP)
2. scrape a short-lived token from fast.com
3. ask the speed-test API for the OCAs assigned to this client
4. for every OCA, concurrently: forward DNS, ASN lookup, and location resolution

Location resolution tries a chain of fallbacks: a hostname-inference API, the same API
keyed by Netflix's own ASN, reverse DNS for IPv6-tagged names reached through NAT64, and
finally geocoding of the airport code or city name embedded in the hostname.

Every candidate returned by fast.com produces exactly one [OcaRecord], in the order fast.com
returned them. Only a failure to obtain the token or the candidate list fails the run.

# Examples

## Locate all assigned OCAs

```no_run
use oca_locator::OcaLocator;

#[tokio::main]
async fn main() {
    let locator = OcaLocator::new().unwrap();
    let result = locator.locate().await.unwrap();
    for record in &result.records {
        println!(
            "{} {:?} {}",
            record.hostname,
            record.city(),
            record.method
        );
    }
}
```

## Custom configuration

Configuration is read from `OCA_LOCATOR_*` environment variables (see [LocatorConfig]), and
can be adjusted in code:

```no_run
use oca_locator::{GeocodingStrategy, LocatorConfig, OcaLocator};
use std::time::Duration;

#[tokio::main]
async fn main() {
    let config = LocatorConfig {
        url_count: 3,
        deadline: Duration::from_secs(30),
        geocoding: GeocodingStrategy::Generic,
        ..LocatorConfig::from_env()
    };
    let locator = OcaLocator::with_config(config).unwrap();
    let token = locator.token().await.unwrap();
    println!("{}", token);
}
```

## Replacing collaborators

Every external service sits behind a trait ([SpeedtestApi], [DnsLookup], [AsnLookup],
[PublicIpSource], [LocationProvider], [Geocoder]); any of them can be swapped with the
builder methods on [OcaLocator], e.g. [OcaLocator::geocoder].
*/

mod config;
mod error;
pub mod location;
mod models;
pub mod network;
mod pipeline;
pub mod speedtest;

pub use config::{GeocodingStrategy, LocatorConfig};
pub use error::LocatorError;
pub use location::{Geocoder, LocationEngine, LocationProvider, Tier};
pub use models::{
    AsnInfo, Location, LocatorResult, NetworkInfo, OcaCandidate, OcaRecord, Resolution,
    ResolutionMethod, NETFLIX_ASN,
};
pub use network::{AsnLookup, DnsLookup, PublicIpSource};
pub use speedtest::SpeedtestApi;

use location::{AlephProvider, NominatimGeocoder};
use network::{CymruWhois, HickoryDns, IpifyClient};
use speedtest::{FastComClient, RetryPolicy};
use std::sync::Arc;

/// OcaLocator owns the configuration and every external collaborator of a run.
///
/// See [module doc][crate#examples] for usage examples.
#[derive(Clone)]
pub struct OcaLocator {
    pub config: LocatorConfig,
    speedtest: Arc<dyn SpeedtestApi>,
    public_ip: Arc<dyn PublicIpSource>,
    dns: Arc<dyn DnsLookup>,
    whois: Arc<dyn AsnLookup>,
    primary: Arc<dyn LocationProvider>,
    geocoder: Arc<dyn Geocoder>,
}

impl OcaLocator {
    /// Construct a new OcaLocator configured from the environment.
    pub fn new() -> Result<Self, LocatorError> {
        Self::with_config(LocatorConfig::from_env())
    }

    /// Construct a new OcaLocator with the given configuration and the default collaborators.
    pub fn with_config(config: LocatorConfig) -> Result<Self, LocatorError> {
        Ok(OcaLocator {
            speedtest: Arc::new(FastComClient::new(&config)?),
            public_ip: Arc::new(IpifyClient::new(&config)?),
            dns: Arc::new(HickoryDns::new(config.request_timeout)),
            whois: Arc::new(
                CymruWhois::new(&config.whois_server, config.request_timeout)
                    .with_retry_policy(RetryPolicy::from_config(&config)),
            ),
            primary: Arc::new(AlephProvider::new(&config)?),
            geocoder: Arc::new(NominatimGeocoder::new(&config)?),
            config,
        })
    }

    /// Replace the source of the token and OCA candidates.
    pub fn speedtest(self, speedtest: Arc<dyn SpeedtestApi>) -> Self {
        Self { speedtest, ..self }
    }

    /// Replace the public IP lookup.
    pub fn public_ip_source(self, public_ip: Arc<dyn PublicIpSource>) -> Self {
        Self { public_ip, ..self }
    }

    /// Replace the DNS resolver used for forward lookups and NAT64 PTR lookups.
    pub fn dns(self, dns: Arc<dyn DnsLookup>) -> Self {
        Self { dns, ..self }
    }

    /// Replace the ASN/ISP lookup.
    pub fn whois(self, whois: Arc<dyn AsnLookup>) -> Self {
        Self { whois, ..self }
    }

    /// Replace the primary location provider.
    pub fn primary_provider(self, primary: Arc<dyn LocationProvider>) -> Self {
        Self { primary, ..self }
    }

    /// Replace the generic geocoder.
    pub fn geocoder(self, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder, ..self }
    }

    /// Location engine wired to this locator's providers.
    pub fn engine(&self) -> LocationEngine {
        LocationEngine::new(
            self.primary.clone(),
            self.geocoder.clone(),
            self.dns.clone(),
            &self.config,
        )
    }

    /// Obtain a fresh fast.com token.
    pub async fn token(&self) -> Result<String, LocatorError> {
        self.speedtest.token().await
    }

    /// Describe the network this process runs from. Never fails; unknown fields stay empty.
    pub async fn network_info(&self) -> NetworkInfo {
        network::local_network_info(self.public_ip.as_ref(), self.whois.as_ref()).await
    }
}
