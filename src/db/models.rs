//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Input rejected before any probe or query runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid site id: {0}")]
    InvalidSiteId(String),
    #[error("invalid date range: {0}")]
    InvalidRange(String),
}

/// Parse a site identifier, which must be a UUID.
pub fn parse_site_id(raw: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidSiteId(raw.to_string()))
}

/// Current status of a monitored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Up => "up",
            SiteStatus::Down => "down",
            SiteStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(SiteStatus::Up),
            "down" => Ok(SiteStatus::Down),
            "unknown" => Ok(SiteStatus::Unknown),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

impl From<CheckStatus> for SiteStatus {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Up => SiteStatus::Up,
            CheckStatus::Down => SiteStatus::Down,
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, CheckStatus::Up)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// A monitored website.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub active: bool,
    pub status: SiteStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Site {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            active: true,
            status: SiteStatus::Unknown,
            last_checked: None,
        }
    }
}

/// One recorded probe. Append-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub site_id: Uuid,
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    /// Only set for https targets.
    pub ssl_valid: Option<bool>,
    pub checked_at: DateTime<Utc>,
}
