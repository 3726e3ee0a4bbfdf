//! HTTP probe implementation.

use std::error::Error as _;
use std::time::{Duration, Instant};

use reqwest::{StatusCode, Url};

use super::{parse_target, ProbeError, ProbeOutcome, TIMEOUT_ERROR};

/// Executes single reachability checks. Cheap to clone; the connection pool
/// is shared between clones.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

struct Response {
    status: StatusCode,
    elapsed: Duration,
}

impl Prober {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptrail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Probe `url` once. The whole exchange, including a GET retry, is
    /// bounded by `timeout`; on expiry the request is dropped and the
    /// outcome is `down` with a `timeout` error.
    pub async fn check(&self, url: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let target = parse_target(url)?;
        let https = target.scheme() == "https";

        let outcome = match tokio::time::timeout(timeout, self.request(target)).await {
            Ok(Ok(response)) => ProbeOutcome::from_response(
                response.status.as_u16(),
                response.status.canonical_reason(),
                response.elapsed.as_millis() as u64,
                https,
            ),
            Ok(Err(e)) => ProbeOutcome::transport_failure(describe_error(&e), https),
            Err(_) => ProbeOutcome::transport_failure(TIMEOUT_ERROR.to_string(), https),
        };

        tracing::debug!(
            "Probe {}: {} (code={:?}, {:?}ms)",
            url,
            outcome.status,
            outcome.status_code,
            outcome.response_time_ms
        );

        Ok(outcome)
    }

    /// HEAD first; servers that refuse HEAD get a plain GET.
    async fn request(&self, url: Url) -> Result<Response, reqwest::Error> {
        let start = Instant::now();
        let head = self.client.head(url.clone()).send().await?;
        let status = head.status();

        if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
            return Ok(Response {
                status,
                elapsed: start.elapsed(),
            });
        }

        tracing::debug!("HEAD rejected by {} ({}), retrying with GET", url, status);
        let start = Instant::now();
        let get = self.client.get(url).send().await?;

        Ok(Response {
            status: get.status(),
            elapsed: start.elapsed(),
        })
    }
}

/// reqwest's top-level message hides the cause ("error sending request"),
/// so append the source chain.
fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return TIMEOUT_ERROR.to_string();
    }

    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
