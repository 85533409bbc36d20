use itertools::Itertools;
use oca_locator::{NetworkInfo, OcaRecord, ResolutionMethod};
use serde::Serialize;
use std::path::Path;

const UNKNOWN: &str = "-";

#[derive(Serialize, tabled::Tabled)]
pub struct OcaRow {
    pub hostname: String,
    pub ip: String,
    pub asn: String,
    pub isp: String,
    pub city: String,
    pub iata: String,
    pub coordinates: String,
    pub method: String,
}

impl From<&OcaRecord> for OcaRow {
    fn from(record: &OcaRecord) -> Self {
        let coordinates = record
            .location
            .as_ref()
            .and_then(|l| Some(format!("{:.4}, {:.4}", l.latitude?, l.longitude?)))
            .unwrap_or_else(|| UNKNOWN.to_string());
        OcaRow {
            hostname: record.hostname.clone(),
            ip: record
                .ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            asn: record
                .asn
                .map(|asn| format!("AS{}", asn))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            isp: record.isp.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            city: record.city().unwrap_or(UNKNOWN).to_string(),
            iata: record.iata_code().unwrap_or(UNKNOWN).to_string(),
            coordinates,
            method: record.method.to_string(),
        }
    }
}

/// One line describing the local network.
pub fn network_line(network: &NetworkInfo) -> String {
    format!(
        "network: ip={} asn={} isp={} country={}",
        network
            .public_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        network
            .asn
            .map(|asn| format!("AS{}", asn))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        network.isp.as_deref().unwrap_or(UNKNOWN),
        network.country.as_deref().unwrap_or(UNKNOWN),
    )
}

/// Count records per resolution method, in a fixed method order.
pub fn method_summary(records: &[OcaRecord]) -> Vec<(ResolutionMethod, usize)> {
    let counts = records.iter().map(|r| r.method).counts();
    [
        ResolutionMethod::PrimaryApi,
        ResolutionMethod::PrimaryApiAsnFallback,
        ResolutionMethod::Nat64Ptr,
        ResolutionMethod::GenericGeocoding,
        ResolutionMethod::Unresolved,
    ]
    .into_iter()
    .filter_map(|m| counts.get(&m).map(|c| (m, *c)))
    .collect()
}

pub fn summary_line(records: &[OcaRecord]) -> String {
    let parts = method_summary(records)
        .into_iter()
        .map(|(method, count)| format!("{}={}", method, count))
        .join(", ");
    format!("{} OCAs: {}", records.len(), parts)
}

pub fn write_output(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)
}
