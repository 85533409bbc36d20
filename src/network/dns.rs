use crate::LocatorError;
use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Forward and reverse DNS lookups.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// All addresses of `hostname`, in resolver order.
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, LocatorError>;

    /// PTR name of `ip` without the trailing dot, or `None` if there is no PTR record.
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>, LocatorError>;
}

/// [DnsLookup] using hickory's async resolver with the system configuration.
#[derive(Clone)]
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
            .unwrap_or_else(|e| {
                warn!("cannot read system resolver configuration, using defaults: {}", e);
                (ResolverConfig::default(), ResolverOpts::default())
            });
        opts.timeout = timeout;
        opts.attempts = 2;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        HickoryDns {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, LocatorError> {
        let response = self.resolver.lookup_ip(hostname).await?;
        Ok(response.iter().collect())
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>, LocatorError> {
        let response = self.resolver.reverse_lookup(ip).await?;
        Ok(response
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string()))
    }
}

/// Pick the address to report for a hostname: the first IPv4 address, else the first IPv6.
pub fn preferred_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Resolve a hostname to its preferred address.
///
/// Lookup failures are logged and reported as `None`; a single unreachable OCA never aborts
/// the batch.
pub async fn resolve_hostname(dns: &dyn DnsLookup, hostname: &str) -> Option<IpAddr> {
    match dns.lookup_ip(hostname).await {
        Ok(addrs) => {
            let ip = preferred_address(&addrs);
            match ip {
                Some(ip) => debug!("resolved {} to {}", hostname, ip),
                None => debug!("{} has no addresses", hostname),
            }
            ip
        }
        Err(e) => {
            warn!("failed to resolve {}: {}", hostname, e);
            None
        }
    }
}
