//! Scrapes the speed-test authorization token out of fast.com's client-side script.
//!
//! Flow:
//! 1. Fetch the fast.com homepage (skipped when a script URL is configured)
//! 2. Find the `<script src="/app-<hex>.js">` element
//! 3. Fetch that script
//! 4. Extract the token from `token:"<value>",urlCount`
//!
//! The markup is minified third-party code with no stability guarantee. Any step that
//! fails to find what it expects is reported as [LocatorError::TokenNotFound].

use crate::speedtest::common::{fetch_body, remove_trailing_slash, RetryPolicy};
use crate::LocatorError;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

lazy_static! {
    static ref TOKEN_PATTERN: Regex =
        Regex::new(r#"token:\s*"([^"]+)"\s*,\s*urlCount"#).expect("invalid regex pattern");
    static ref LOOSE_TOKEN_PATTERN: Regex =
        Regex::new(r#"token:\s*"([^"]+)""#).expect("invalid regex pattern");
    static ref APP_SCRIPT_PATTERN: Regex =
        Regex::new(r"(^|/)app-[0-9a-fA-F]+\.js$").expect("invalid regex pattern");
}

/// Extract the token from the body of the fast.com app script.
///
/// The `token:"...",urlCount` shape is preferred; a bare `token:"..."` is accepted as a
/// fallback since the property order is not something fast.com promises.
pub fn extract_token(script: &str) -> Result<String, LocatorError> {
    if let Some(cap) = TOKEN_PATTERN.captures(script) {
        return Ok(cap[1].to_string());
    }
    if let Some(cap) = LOOSE_TOKEN_PATTERN.captures(script) {
        debug!("token found without trailing urlCount property");
        return Ok(cap[1].to_string());
    }
    Err(LocatorError::TokenNotFound(format!(
        "no token:\"...\" pattern in {} bytes of script",
        script.len()
    )))
}

/// Find the path of the fast.com app script in the homepage HTML.
pub fn find_script_path(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script[src]").expect("invalid selector");
    document
        .select(&selector)
        .filter_map(|elem| elem.value().attr("src"))
        .find(|src| APP_SCRIPT_PATTERN.is_match(src))
        .map(|src| src.to_string())
}

/// Turn a script `src` attribute into an absolute URL.
pub(crate) fn script_url(base_url: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        src.to_string()
    } else if let Some(rest) = src.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!(
            "{}/{}",
            remove_trailing_slash(base_url),
            src.trim_start_matches('/')
        )
    }
}

/// Obtain a fresh token.
///
/// # Arguments
///
/// * `fast_com_url`: homepage used to discover the app script
/// * `fixed_script_url`: fetch this script directly instead of discovering it
pub async fn fetch_token(
    client: &reqwest::Client,
    fast_com_url: &str,
    fixed_script_url: Option<&str>,
    policy: &RetryPolicy,
) -> Result<String, LocatorError> {
    let url = match fixed_script_url {
        Some(url) => url.to_string(),
        None => {
            debug!("fetching fast.com homepage {}", fast_com_url);
            let html = fetch_body(client, fast_com_url, policy)
                .await
                .map_err(|e| LocatorError::TokenFetchError(format!("{}: {}", fast_com_url, e)))?;
            let src = find_script_path(&html).ok_or_else(|| {
                LocatorError::TokenNotFound(format!(
                    "no app-*.js script element on {}",
                    fast_com_url
                ))
            })?;
            script_url(fast_com_url, &src)
        }
    };

    debug!("fetching token script {}", url);
    let script = fetch_body(client, &url, policy)
        .await
        .map_err(|e| LocatorError::TokenFetchError(format!("{}: {}", url, e)))?;
    let token = extract_token(&script)?;
    debug!(
        "extracted token {}...",
        token.chars().take(8).collect::<String>()
    );
    Ok(token)
}
