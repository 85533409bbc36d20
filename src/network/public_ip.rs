use crate::speedtest::common::{send_with_retry, RetryPolicy};
use crate::{LocatorConfig, LocatorError};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

/// Discovery of the caller's public IP address.
#[async_trait]
pub trait PublicIpSource: Send + Sync {
    async fn public_ip(&self) -> Result<IpAddr, LocatorError>;
}

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: String,
}

/// [PublicIpSource] backed by an ipify-style `{"ip": "..."}` JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpifyClient {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl IpifyClient {
    pub fn new(config: &LocatorConfig) -> Result<Self, LocatorError> {
        Ok(IpifyClient {
            client: config.http_client()?,
            url: config.public_ip_url.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl PublicIpSource for IpifyClient {
    async fn public_ip(&self) -> Result<IpAddr, LocatorError> {
        let response = send_with_retry(&self.policy, &self.url, || {
            self.client.get(self.url.as_str()).send()
        })
        .await?;
        let body: IpifyResponse = response.json().await?;
        let ip = body.ip.trim().parse::<IpAddr>().map_err(|_| {
            LocatorError::InvalidResponse(format!(
                "{} returned an invalid address '{}'",
                self.url, body.ip
            ))
        })?;
        debug!("public ip: {}", ip);
        Ok(ip)
    }
}
