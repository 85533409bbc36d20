use oca_locator::{LocatorConfig, OcaLocator};
use std::time::Duration;

/// Locate the OCAs fast.com assigns to this network and print one line per OCA.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let config = LocatorConfig {
        url_count: 5,
        deadline: Duration::from_secs(60),
        ..LocatorConfig::from_env()
    };
    let locator = OcaLocator::with_config(config).unwrap();

    let result = match locator.locate().await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("discovery failed: {}", e);
            return;
        }
    };

    println!(
        "network: {:?} AS{:?} {:?}",
        result.network.public_ip, result.network.asn, result.network.isp
    );
    for record in &result.records {
        println!(
            "{:<50} {:<40} {:<8} {}",
            record.hostname,
            record.city().unwrap_or("-"),
            record.iata_code().unwrap_or("-"),
            record.method
        );
    }
    println!(
        "{} of {} OCAs located",
        result.resolved_count(),
        result.records.len()
    );
}
