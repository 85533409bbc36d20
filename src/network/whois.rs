//! ASN/ISP lookup over Team Cymru's bulk whois protocol.
//!
//! Request (one TCP connection, port 43):
//! ```text
//! begin
//! verbose
//! 45.57.120.66
//! end
//! ```
//!
//! Response:
//! ```text
//! Bulk mode; whois.cymru.com [2024-05-01 12:00:00 +0000]
//! AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name
//! 2906    | 45.57.120.66     | 45.57.120.0/24      | US | arin     | 2015-03-13 | NETFLIX-ASN - Netflix Streaming Services Inc., US
//! ```
use crate::models::AsnInfo;
use crate::speedtest::RetryPolicy;
use crate::LocatorError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Routing-registry lookup of an IP address.
#[async_trait]
pub trait AsnLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<AsnInfo, LocatorError>;
}

/// Bulk whois client.
#[derive(Debug, Clone)]
pub struct CymruWhois {
    /// `host:port`
    server: String,
    /// bound of a single connection attempt
    timeout: Duration,
    policy: RetryPolicy,
}

impl CymruWhois {
    pub fn new(server: impl ToString, timeout: Duration) -> Self {
        CymruWhois {
            server: server.to_string(),
            timeout,
            policy: RetryPolicy::default(),
        }
    }

    /// Retry dropped connections and timeouts according to `policy`.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Look up several addresses over one connection.
    ///
    /// Rows come back keyed by IP; addresses the service has no data for are absent.
    pub async fn lookup_bulk(&self, ips: &[IpAddr]) -> Result<Vec<(IpAddr, AsnInfo)>, LocatorError> {
        if ips.is_empty() {
            return Ok(vec![]);
        }
        let mut query = String::from("begin\nverbose\n");
        for ip in ips {
            query.push_str(&ip.to_string());
            query.push('\n');
        }
        query.push_str("end\n");

        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            let error = match self.exchange_bounded(&query).await {
                Ok(response) => return Ok(parse_bulk_response(&response)),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt + 1 >= attempts {
                return Err(error);
            }
            let backoff = self.policy.backoff(attempt);
            warn!(
                "whois query to {} failed (attempt {}/{}), retrying in {}ms: {}",
                self.server,
                attempt + 1,
                attempts,
                backoff.as_millis(),
                error
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn exchange_bounded(&self, query: &str) -> Result<String, LocatorError> {
        tokio::time::timeout(self.timeout, self.exchange(query))
            .await
            .map_err(|_| {
                LocatorError::Timeout(format!(
                    "whois query to {} timed out after {}s",
                    self.server,
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn exchange(&self, query: &str) -> Result<String, LocatorError> {
        let mut stream = TcpStream::connect(self.server.as_str()).await?;
        stream.write_all(query.as_bytes()).await?;
        stream.flush().await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        if buf.is_empty() {
            // closed without a reply
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection without answering", self.server),
            )
            .into());
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[async_trait]
impl AsnLookup for CymruWhois {
    async fn lookup(&self, ip: IpAddr) -> Result<AsnInfo, LocatorError> {
        let rows = self.lookup_bulk(&[ip]).await?;
        rows.into_iter()
            .find(|(row_ip, _)| *row_ip == ip)
            .map(|(_, info)| info)
            .ok_or_else(|| LocatorError::WhoisError(format!("no whois data for {}", ip)))
    }
}

fn non_empty(field: &str) -> Option<String> {
    match field.trim() {
        "" | "NA" => None,
        s => Some(s.to_string()),
    }
}

/// Parse one data row of a verbose bulk response.
pub fn parse_row(line: &str) -> Option<(IpAddr, AsnInfo)> {
    let fields: Vec<&str> = line.split('|').map(|f| f.trim()).collect();
    if fields.len() < 7 {
        return None;
    }
    let ip: IpAddr = fields[1].parse().ok()?;
    let asn = fields[0]
        .trim_start_matches("AS")
        .trim()
        .parse::<u32>()
        .ok();
    // the AS name may itself contain '|'
    let as_name = non_empty(&fields[6..].join("|"));

    Some((
        ip,
        AsnInfo {
            asn,
            as_name,
            country: non_empty(fields[3]),
            bgp_prefix: non_empty(fields[2]),
            registry: non_empty(fields[4]),
            allocated: non_empty(fields[5]),
        },
    ))
}

/// Parse a verbose bulk response, skipping the banner and header lines.
pub fn parse_bulk_response(response: &str) -> Vec<(IpAddr, AsnInfo)> {
    response
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("Bulk mode") && !l.starts_with("AS ") && !l.starts_with("AS|"))
        .filter_map(|l| {
            let row = parse_row(l);
            if row.is_none() {
                debug!("skipping whois line: {}", l);
            }
            row
        })
        .collect()
}

/// Look up `ip`, degrading to unknown fields on any failure.
pub async fn lookup_or_unknown(whois: &dyn AsnLookup, ip: IpAddr) -> AsnInfo {
    match whois.lookup(ip).await {
        Ok(info) => info,
        Err(e) => {
            warn!("ASN lookup for {} failed: {}", ip, e);
            AsnInfo::default()
        }
    }
}
