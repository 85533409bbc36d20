//! Error handling module.
use thiserror::Error;

/// Locator error enum.
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("NetworkError: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("HttpStatusError: {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The token pattern did not match the fetched script; fast.com changed its markup.
    #[error("TokenNotFoundError: {0}")]
    TokenNotFound(String),

    #[error("TokenFetchError: {0}")]
    TokenFetchError(String),

    #[error("CandidateFetchError: {0}")]
    CandidateFetchError(String),

    #[error("DeadlineExceeded: run deadline expired during {stage}")]
    DeadlineExceeded { stage: &'static str },

    #[error("TimeoutError: {0}")]
    Timeout(String),

    #[error("DnsError: {0}")]
    DnsError(#[from] hickory_resolver::error::ResolveError),

    #[error("WhoisError: {0}")]
    WhoisError(String),

    #[error("InvalidResponseError: {0}")]
    InvalidResponse(String),

    #[error("GeocodingError: {0}")]
    GeocodingError(String),

    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JsonError: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("ConfigError: {0}")]
    ConfigError(String),
}

impl LocatorError {
    /// Whether a failed external call may succeed if attempted again.
    ///
    /// Connection problems, timeouts and 5xx responses are transient. 4xx responses are not
    /// retried: the same request (e.g. with the same expired token) cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LocatorError::NetworkError(e) => match e.status() {
                Some(status) => status.is_server_error(),
                None => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            },
            LocatorError::HttpStatus { status, .. } => (500..600).contains(status),
            LocatorError::Timeout(_) => true,
            LocatorError::IoError(_) => true,
            _ => false,
        }
    }

    /// HTTP status code attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LocatorError::HttpStatus { status, .. } => Some(*status),
            LocatorError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server = LocatorError::HttpStatus {
            url: "https://api.fast.com".to_string(),
            status: 503,
        };
        assert!(server.is_retryable());
        assert_eq!(server.status(), Some(503));

        let forbidden = LocatorError::HttpStatus {
            url: "https://api.fast.com".to_string(),
            status: 403,
        };
        assert!(!forbidden.is_retryable());

        assert!(!LocatorError::TokenNotFound("no token".to_string()).is_retryable());
        assert!(LocatorError::Timeout("slow".to_string()).is_retryable());
    }
}
