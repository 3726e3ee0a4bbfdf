//! Storage seams consumed by the monitoring core.
//!
//! The core only ever appends check results and reads them back by site and
//! time range, plus looks up a site by id. Anything implementing these two
//! traits can stand in for the SQLite [`Store`](super::Store).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{CheckResult, Site};
use super::store::DbError;

/// Ordering of a check result query, by `checked_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// A range query over one site's check results.
///
/// The range is half-open: `start <= checked_at < end`. A missing `end`
/// leaves the range open towards the future.
#[derive(Debug, Clone)]
pub struct CheckQuery {
    pub site_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub order: Order,
}

impl CheckQuery {
    pub fn between(site_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            site_id,
            start,
            end: Some(end),
            limit: None,
            order: Order::Ascending,
        }
    }

    pub fn since(site_id: Uuid, start: DateTime<Utc>) -> Self {
        Self {
            site_id,
            start,
            end: None,
            limit: None,
            order: Order::Ascending,
        }
    }

    /// The most recent result for a site, whenever it happened.
    pub fn latest(site_id: Uuid) -> Self {
        Self::since(site_id, DateTime::<Utc>::UNIX_EPOCH).newest_first().limit(1)
    }

    pub fn newest_first(mut self) -> Self {
        self.order = Order::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Append-only log of check results.
pub trait CheckLog: Send + Sync {
    fn append_check_result(&self, result: &CheckResult) -> Result<(), DbError>;

    fn query_check_results(&self, query: &CheckQuery) -> Result<Vec<CheckResult>, DbError>;

    fn latest_check_result(&self, site_id: Uuid) -> Result<Option<CheckResult>, DbError> {
        Ok(self
            .query_check_results(&CheckQuery::latest(site_id))?
            .into_iter()
            .next())
    }
}

/// Site lookup. Implementations decide which sites the caller may see;
/// a site that exists but is not visible is reported as `None`.
pub trait SiteDirectory: Send + Sync {
    fn find_site(&self, id: Uuid) -> Result<Option<Site>, DbError>;
}
