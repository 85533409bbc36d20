//! Access to the fast.com speed-test service: token discovery and OCA candidates.
mod candidates;
pub(crate) mod common;
mod token;

use crate::models::OcaCandidate;
use crate::{LocatorConfig, LocatorError};
use async_trait::async_trait;

pub use candidates::{fetch_candidates, hostname_from_url, parse_candidates};
pub use common::RetryPolicy;
pub use token::{extract_token, fetch_token, find_script_path};

/// Source of OCA candidates.
#[async_trait]
pub trait SpeedtestApi: Send + Sync {
    /// Obtain a fresh authorization token.
    async fn token(&self) -> Result<String, LocatorError>;

    /// List the OCAs currently assigned to this client.
    async fn candidates(&self, token: &str) -> Result<Vec<OcaCandidate>, LocatorError>;
}

/// [SpeedtestApi] backed by fast.com.
#[derive(Debug, Clone)]
pub struct FastComClient {
    client: reqwest::Client,
    fast_com_url: String,
    script_url: Option<String>,
    api_url: String,
    url_count: u32,
    policy: RetryPolicy,
}

impl FastComClient {
    pub fn new(config: &LocatorConfig) -> Result<Self, LocatorError> {
        Ok(FastComClient {
            client: config.http_client()?,
            fast_com_url: config.fast_com_url.clone(),
            script_url: config.script_url.clone(),
            api_url: config.speedtest_api_url.clone(),
            url_count: config.url_count,
            policy: RetryPolicy::from_config(config),
        })
    }
}

#[async_trait]
impl SpeedtestApi for FastComClient {
    async fn token(&self) -> Result<String, LocatorError> {
        fetch_token(
            &self.client,
            &self.fast_com_url,
            self.script_url.as_deref(),
            &self.policy,
        )
        .await
    }

    async fn candidates(&self, token: &str) -> Result<Vec<OcaCandidate>, LocatorError> {
        fetch_candidates(
            &self.client,
            &self.api_url,
            token,
            self.url_count,
            &self.policy,
        )
        .await
    }
}
