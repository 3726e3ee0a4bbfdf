//! Probe module for website reachability checks.
//!
//! A probe never fails because the target is unreachable: that is a normal
//! `down` outcome. [`ProbeError`] is reserved for input that cannot be probed
//! at all.

mod http;

pub use http::*;

use chrono::{DateTime, Utc};
use reqwest::Url;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{CheckResult, CheckStatus};

/// Error description recorded when a probe hits its deadline.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("http client error: {0}")]
    Client(String),
}

/// Classify an HTTP status code: 2xx and 3xx are up, everything else is down.
pub fn classify_status(code: u16) -> CheckStatus {
    if (200..400).contains(&code) {
        CheckStatus::Up
    } else {
        CheckStatus::Down
    }
}

/// Validate a probe target. Only absolute http and https URLs are accepted.
pub fn parse_target(url: &str) -> Result<Url, ProbeError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(ProbeError::UnsupportedScheme(other.to_string())),
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ProbeError::InvalidUrl(format!("{}: missing host", url)));
    }

    Ok(parsed)
}

/// What a single probe observed, before it is attributed to a site.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub ssl_valid: Option<bool>,
}

impl ProbeOutcome {
    /// The server answered. A response over https means the TLS handshake
    /// succeeded, whatever the status code.
    pub fn from_response(status_code: u16, reason: Option<&str>, response_time_ms: u64, https: bool) -> Self {
        let status = classify_status(status_code);
        let error = match (status, reason) {
            (CheckStatus::Up, _) => None,
            (CheckStatus::Down, Some(reason)) => Some(format!("HTTP {} {}", status_code, reason)),
            (CheckStatus::Down, None) => Some(format!("HTTP {}", status_code)),
        };

        Self {
            status,
            status_code: Some(status_code),
            response_time_ms: Some(response_time_ms),
            error,
            ssl_valid: https.then_some(true),
        }
    }

    /// No response at all: DNS, connect, TLS, or deadline failure.
    pub fn transport_failure(error: String, https: bool) -> Self {
        Self {
            status: CheckStatus::Down,
            status_code: None,
            response_time_ms: None,
            error: Some(error),
            ssl_valid: https.then_some(false),
        }
    }

    pub fn into_check_result(self, site_id: Uuid, checked_at: DateTime<Utc>) -> CheckResult {
        CheckResult {
            site_id,
            status: self.status,
            status_code: self.status_code,
            response_time_ms: self.response_time_ms,
            error: self.error,
            ssl_valid: self.ssl_valid,
            checked_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_boundaries() {
        assert_eq!(classify_status(199), CheckStatus::Down);
        assert_eq!(classify_status(200), CheckStatus::Up);
        assert_eq!(classify_status(301), CheckStatus::Up);
        assert_eq!(classify_status(399), CheckStatus::Up);
        assert_eq!(classify_status(400), CheckStatus::Down);
        assert_eq!(classify_status(500), CheckStatus::Down);
        assert_eq!(classify_status(100), CheckStatus::Down);
    }

    #[test]
    fn test_parse_target() {
        assert!(parse_target("https://example.com").is_ok());
        assert!(parse_target("http://example.com:8080/health").is_ok());
        assert!(matches!(parse_target("ftp://example.com"), Err(ProbeError::UnsupportedScheme(_))));
        assert!(matches!(parse_target("example.com"), Err(ProbeError::InvalidUrl(_))));
        assert!(matches!(parse_target(""), Err(ProbeError::InvalidUrl(_))));
    }

    #[test]
    fn test_outcome_ssl_inference() {
        let ok = ProbeOutcome::from_response(200, Some("OK"), 120, true);
        assert_eq!(ok.status, CheckStatus::Up);
        assert_eq!(ok.ssl_valid, Some(true));
        assert!(ok.error.is_none());

        let plain = ProbeOutcome::from_response(200, Some("OK"), 120, false);
        assert_eq!(plain.ssl_valid, None);

        let server_error = ProbeOutcome::from_response(503, Some("Service Unavailable"), 30, true);
        assert_eq!(server_error.status, CheckStatus::Down);
        assert_eq!(server_error.ssl_valid, Some(true));
        assert_eq!(server_error.error.as_deref(), Some("HTTP 503 Service Unavailable"));

        let tls = ProbeOutcome::transport_failure("tls handshake failed".to_string(), true);
        assert_eq!(tls.ssl_valid, Some(false));
        assert_eq!(tls.status_code, None);
        assert_eq!(tls.response_time_ms, None);

        let refused = ProbeOutcome::transport_failure("connection refused".to_string(), false);
        assert_eq!(refused.ssl_valid, None);
    }
}
