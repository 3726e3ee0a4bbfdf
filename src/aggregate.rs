//! Uptime aggregation over windows of check results.
//!
//! Inputs are never assumed to be sorted or contiguous; everything that
//! depends on order sorts explicitly. Hourly buckets are UTC and aligned to
//! the top of the hour.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{CheckResult, CheckStatus};

/// Default number of incidents listed per summary.
pub const DEFAULT_INCIDENT_CAP: usize = 25;

/// Number of buckets in the rolling timeline.
pub const TIMELINE_HOURS: i64 = 24;

/// A recorded `down` check, as surfaced in reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub site_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl From<&CheckResult> for Incident {
    fn from(result: &CheckResult) -> Self {
        Self {
            site_id: result.site_id,
            timestamp: result.checked_at,
            status_code: result.status_code,
            response_time_ms: result.response_time_ms,
            error: result.error.clone(),
        }
    }
}

/// Uptime statistics for one site over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeSummary {
    pub site_id: Uuid,
    pub total_checks: usize,
    pub up_count: usize,
    pub down_count: usize,
    pub uptime_percent: f64,
    pub avg_response_ms: Option<f64>,
    pub min_response_ms: Option<u64>,
    pub max_response_ms: Option<u64>,
    /// Most recent first, at most the incident cap.
    pub incidents: Vec<Incident>,
}

/// `up / total * 100`, and 100 when there is no data: an empty window is
/// not evidence of downtime.
pub fn uptime_percent(up: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    up as f64 / total as f64 * 100.0
}

/// Summarize one site's check results.
pub fn summarize(site_id: Uuid, results: &[CheckResult], incident_cap: usize) -> UptimeSummary {
    let total_checks = results.len();
    let up_count = results.iter().filter(|r| r.status.is_up()).count();
    let down_count = total_checks - up_count;

    let times: Vec<u64> = results.iter().filter_map(|r| r.response_time_ms).collect();
    let avg_response_ms = if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<u64>() as f64 / times.len() as f64)
    };

    let mut downs: Vec<&CheckResult> = results
        .iter()
        .filter(|r| r.status == CheckStatus::Down)
        .collect();
    downs.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));

    UptimeSummary {
        site_id,
        total_checks,
        up_count,
        down_count,
        uptime_percent: uptime_percent(up_count, total_checks),
        avg_response_ms,
        min_response_ms: times.iter().copied().min(),
        max_response_ms: times.iter().copied().max(),
        incidents: downs.into_iter().take(incident_cap).map(Incident::from).collect(),
    }
}

/// Visual state of one timeline bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    Up,
    Partial,
    Down,
}

/// One hour of the rolling timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    pub start: DateTime<Utc>,
    pub total_checks: usize,
    pub up_count: usize,
    pub uptime_percent: f64,
    pub state: BucketState,
}

impl HourlyBucket {
    fn empty(start: DateTime<Utc>) -> Self {
        Self {
            start,
            total_checks: 0,
            up_count: 0,
            uptime_percent: 100.0,
            state: BucketState::Up,
        }
    }

    fn finish(&mut self) {
        self.uptime_percent = uptime_percent(self.up_count, self.total_checks);
        self.state = if self.up_count == self.total_checks {
            BucketState::Up
        } else if self.up_count == 0 {
            BucketState::Down
        } else {
            BucketState::Partial
        };
    }
}

/// Start of the first timeline bucket for `now`.
pub fn timeline_start(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_window(now, 3600) - Duration::hours(TIMELINE_HOURS - 1)
}

/// The last 24 hours in hourly buckets, oldest first, the last bucket being
/// the current (partial) hour. Results outside the window are ignored and
/// empty hours count as fully up.
pub fn hourly_timeline(results: &[CheckResult], now: DateTime<Utc>) -> Vec<HourlyBucket> {
    let first = timeline_start(now);
    let mut buckets: Vec<HourlyBucket> = (0..TIMELINE_HOURS)
        .map(|i| HourlyBucket::empty(first + Duration::hours(i)))
        .collect();

    let mut ordered: Vec<&CheckResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.checked_at);

    for result in ordered {
        if result.checked_at < first {
            continue;
        }
        let index = (result.checked_at - first).num_hours();
        if index >= TIMELINE_HOURS {
            break;
        }

        let bucket = &mut buckets[index as usize];
        bucket.total_checks += 1;
        if result.status.is_up() {
            bucket.up_count += 1;
        }
    }

    for bucket in &mut buckets {
        bucket.finish();
    }
    buckets
}

/// Truncate a datetime to the start of its containing window.
pub fn truncate_to_window(dt: DateTime<Utc>, window_seconds: i64) -> DateTime<Utc> {
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(window_seconds);
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}
