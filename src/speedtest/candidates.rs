//! Fetch and parse the OCA candidate list from the fast.com speed-test API.
use crate::models::OcaCandidate;
use crate::speedtest::common::{send_with_retry, RetryPolicy};
use crate::LocatorError;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Extract the hostname from a candidate URL.
///
/// Scheme-relative URLs (`//host/path`) are read as https.
pub fn hostname_from_url(url: &str) -> Option<String> {
    let absolute = match url.strip_prefix("//") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    };
    let parsed = reqwest::Url::parse(absolute.as_str()).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
}

fn candidate_from_entry(idx: usize, entry: &Value) -> Result<OcaCandidate, LocatorError> {
    let (url, metadata) = match entry {
        Value::String(url) => (url.as_str(), Value::Null),
        Value::Object(map) => match map.get("url").and_then(Value::as_str) {
            Some(url) => (url, entry.clone()),
            None => {
                return Err(LocatorError::CandidateFetchError(format!(
                    "entry {} has no url",
                    idx
                )))
            }
        },
        _ => {
            return Err(LocatorError::CandidateFetchError(format!(
                "entry {} is neither a url nor an object",
                idx
            )))
        }
    };
    match hostname_from_url(url) {
        Some(hostname) => Ok(OcaCandidate {
            hostname,
            url: url.to_string(),
            metadata,
        }),
        None => {
            warn!("candidate entry {} has unparsable url {}", idx, url);
            Err(LocatorError::CandidateFetchError(format!(
                "entry {} has unparsable url {}",
                idx, url
            )))
        }
    }
}

/// Parse the body of a speed-test API response.
///
/// Accepted shapes:
/// - a JSON array of `{"url": ..., "location": {...}}` entries
/// - an object with a `targets` array of such entries
/// - a single object with a `url` field
///
/// Order is preserved and duplicate hostnames are kept. Any entry without a usable URL
/// fails the whole response, so the result always has one candidate per entry.
pub fn parse_candidates(body: &str) -> Result<Vec<OcaCandidate>, LocatorError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        LocatorError::CandidateFetchError(format!("response is not valid JSON: {}", e))
    })?;

    let entries: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("targets") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ if map.contains_key("url") => vec![&value],
            _ => {
                return Err(LocatorError::CandidateFetchError(
                    "response object has neither targets nor url".to_string(),
                ))
            }
        },
        _ => {
            return Err(LocatorError::CandidateFetchError(format!(
                "unexpected response type: {}",
                body.chars().take(64).collect::<String>()
            )))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| candidate_from_entry(idx, entry))
        .collect()
}

/// Request `url_count` OCA URLs with the given token.
///
/// 4xx responses (typically an expired or rejected token) fail immediately; transient
/// failures are retried according to `policy`.
pub async fn fetch_candidates(
    client: &reqwest::Client,
    api_url: &str,
    token: &str,
    url_count: u32,
    policy: &RetryPolicy,
) -> Result<Vec<OcaCandidate>, LocatorError> {
    debug!("fetching {} OCA candidates from {}", url_count, api_url);
    let url_count = url_count.to_string();
    let response = send_with_retry(policy, api_url, || {
        client
            .get(api_url)
            .query(&[
                ("https", "true"),
                ("token", token),
                ("urlCount", url_count.as_str()),
            ])
            .send()
    })
    .await
    .map_err(|e| LocatorError::CandidateFetchError(e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| LocatorError::CandidateFetchError(e.to_string()))?;
    let candidates = parse_candidates(&body)?;
    info!("retrieved {} OCA candidates", candidates.len());
    Ok(candidates)
}
