//! Per-site check rate limiting.
//!
//! The limiter keeps no state of its own: the check log already records when
//! each site was last probed, so a site is allowed again once its most recent
//! result is older than the window.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::{CheckLog, CheckQuery, DbError};

/// Result of asking whether a site may be checked now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { next_check_allowed: DateTime<Utc> },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// At most one accepted check per site per window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Decide from the timestamp of the site's last check.
    pub fn decide(&self, last_check: Option<DateTime<Utc>>, now: DateTime<Utc>) -> RateDecision {
        match last_check {
            Some(last) if now - last < self.window => RateDecision::Limited {
                next_check_allowed: last + self.window,
            },
            _ => RateDecision::Allowed,
        }
    }

    /// Look up the newest check inside the window and decide.
    pub fn allow(&self, log: &dyn CheckLog, site_id: Uuid, now: DateTime<Utc>) -> Result<RateDecision, DbError> {
        let recent = log.query_check_results(
            &CheckQuery::since(site_id, now - self.window)
                .newest_first()
                .limit(1),
        )?;

        let decision = self.decide(recent.first().map(|r| r.checked_at), now);
        if let RateDecision::Limited { next_check_allowed } = decision {
            tracing::debug!("Rate limited check for {} until {}", site_id, next_check_allowed);
        }
        Ok(decision)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}
