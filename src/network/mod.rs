//! DNS, ASN and public-IP lookups.
//!
//! None of these are fatal to a run: failures degrade to `None` or unknown fields.
mod dns;
mod public_ip;
mod whois;

pub use dns::{preferred_address, resolve_hostname, DnsLookup, HickoryDns};
pub use public_ip::{IpifyClient, PublicIpSource};
pub use whois::{lookup_or_unknown, parse_bulk_response, parse_row, AsnLookup, CymruWhois};

use crate::models::{AsnInfo, NetworkInfo};
use tracing::{info, warn};

/// Describe the network the locator runs from: public IP plus its ASN/ISP.
pub async fn local_network_info(
    source: &dyn PublicIpSource,
    whois: &dyn AsnLookup,
) -> NetworkInfo {
    let public_ip = match source.public_ip().await {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!("cannot determine public IP: {}", e);
            None
        }
    };
    let asn_info = match public_ip {
        Some(ip) => lookup_or_unknown(whois, ip).await,
        None => AsnInfo::default(),
    };
    let network = NetworkInfo::new(public_ip, asn_info);
    info!(
        "local network: ip={}, asn={}, isp={}",
        network
            .public_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        network
            .asn
            .map(|asn| format!("AS{}", asn))
            .unwrap_or_else(|| "unknown".to_string()),
        network.isp.as_deref().unwrap_or("unknown")
    );
    network
}
