//! The monitoring service: one explicitly constructed value that owns the
//! prober, rate limiter and status cache, and writes through to the store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{hourly_timeline, summarize, timeline_start, HourlyBucket, UptimeSummary};
use crate::cache::{CachedStatus, StatusCache};
use crate::config::ServerConfig;
use crate::db::{
    parse_site_id, CheckLog, CheckQuery, CheckResult, DbError, Site, SiteDirectory, Store, ValidationError,
};
use crate::probe::{parse_target, ProbeError, Prober};
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::report::{Report, ReportBuilder, ReportError};

/// What started a check. Scheduled sweeps use the shorter timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    OnDemand,
    Scheduled,
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("site not found: {0}")]
    SiteNotFound(Uuid),
    #[error("site is paused: {0}")]
    SiteInactive(Uuid),
    #[error("check rate limited until {next_check_allowed}")]
    RateLimited { next_check_allowed: DateTime<Utc> },
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Tunables of the monitoring service.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub on_demand_timeout: Duration,
    pub scheduled_timeout: Duration,
    pub rate_limit_window: ChronoDuration,
    pub cache_ttl: Duration,
    pub fallback_ttl: Duration,
    pub incident_cap: usize,
}

impl From<&ServerConfig> for MonitorSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            on_demand_timeout: cfg.on_demand_timeout(),
            scheduled_timeout: cfg.scheduled_timeout(),
            rate_limit_window: cfg.rate_limit_window(),
            cache_ttl: cfg.cache_ttl(),
            fallback_ttl: cfg.fallback_ttl(),
            incident_cap: cfg.incident_cap,
        }
    }
}

impl MonitorSettings {
    /// TTL for statuses repopulated from storage, capped by the primary TTL.
    pub fn effective_fallback_ttl(&self) -> Duration {
        self.fallback_ttl.min(self.cache_ttl)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

pub struct Monitor {
    store: Arc<Store>,
    directory: Arc<dyn SiteDirectory>,
    prober: Prober,
    limiter: RateLimiter,
    cache: StatusCache,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(store: Arc<Store>, cache: StatusCache, settings: MonitorSettings) -> Result<Self, ProbeError> {
        Ok(Self {
            directory: store.clone(),
            store,
            prober: Prober::new()?,
            limiter: RateLimiter::new(settings.rate_limit_window),
            cache,
            settings,
        })
    }

    /// Resolve sites through `directory` instead of the store, e.g. to scope
    /// lookups to one owner.
    pub fn with_directory(mut self, directory: Arc<dyn SiteDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    // --- Sites ---

    pub fn sites(&self) -> Result<Vec<Site>, MonitorError> {
        Ok(self.store.get_sites()?)
    }

    /// Register a site after checking its URL can be probed.
    pub fn register_site(&self, name: &str, url: &str) -> Result<Site, MonitorError> {
        let url = parse_target(url)?;
        let site = Site::new(name.trim(), url.as_str());
        self.store.add_site(&site)?;
        tracing::info!("Registered site {} ({})", site.name, site.url);
        Ok(site)
    }

    fn site(&self, id: Uuid) -> Result<Site, MonitorError> {
        match self.directory.find_site(id) {
            Ok(Some(site)) => Ok(site),
            Ok(None) => Err(MonitorError::SiteNotFound(id)),
            Err(e) => {
                tracing::error!("Failed to load site {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    // --- Checks ---

    /// Check a site given its raw identifier.
    pub async fn check_site(&self, raw_site_id: &str, trigger: CheckTrigger) -> Result<CheckResult, MonitorError> {
        let id = parse_site_id(raw_site_id)?;
        self.check(id, trigger).await
    }

    /// Probe a site once, record the result and refresh its cached status.
    pub async fn check(&self, id: Uuid, trigger: CheckTrigger) -> Result<CheckResult, MonitorError> {
        let site = self.site(id)?;
        if !site.active {
            return Err(MonitorError::SiteInactive(id));
        }

        let now = Utc::now();
        if let RateDecision::Limited { next_check_allowed } = self.limiter.allow(self.store.as_ref(), id, now)? {
            return Err(MonitorError::RateLimited { next_check_allowed });
        }

        let timeout = match trigger {
            CheckTrigger::OnDemand => self.settings.on_demand_timeout,
            CheckTrigger::Scheduled => self.settings.scheduled_timeout,
        };
        let result = self
            .prober
            .check(&site.url, timeout)
            .await?
            .into_check_result(id, now);

        if let Err(e) = self.store.append_check_result(&result) {
            tracing::error!("Failed to record check for {}: {}", site.name, e);
            return Err(e.into());
        }
        if let Err(e) = self.store.update_site_status(id, result.status.into(), result.checked_at) {
            tracing::error!("Failed to update status for {}: {}", site.name, e);
            return Err(e.into());
        }

        self.cache.put(id, CachedStatus::from(&result), self.settings.cache_ttl);

        tracing::info!(
            "Checked {} ({:?}): {} code={:?} time={:?}ms",
            site.name,
            trigger,
            result.status,
            result.status_code,
            result.response_time_ms
        );
        Ok(result)
    }

    // --- Reads ---

    /// Latest status for each id, aligned with the input. Cache misses fall
    /// back to the newest stored check; `None` means the site was never checked.
    pub async fn statuses(&self, raw_site_ids: &[String]) -> Result<Vec<Option<CachedStatus>>, MonitorError> {
        let ids = raw_site_ids
            .iter()
            .map(|raw| parse_site_id(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut statuses = self.cache.get_many(&ids);
        for (slot, id) in statuses.iter_mut().zip(ids.iter().copied()) {
            if slot.is_some() {
                continue;
            }

            let store = self.store.clone();
            *slot = self
                .cache
                .get_with_fallback(
                    id,
                    || async move {
                        store
                            .latest_check_result(id)
                            .map(|latest| latest.as_ref().map(CachedStatus::from))
                    },
                    self.settings.effective_fallback_ttl(),
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to read latest check for {}: {}", id, e);
                    MonitorError::Storage(e)
                })?;
        }

        Ok(statuses)
    }

    /// Uptime summary of one site over the trailing `window`.
    pub fn uptime(&self, raw_site_id: &str, window: ChronoDuration, now: DateTime<Utc>) -> Result<UptimeSummary, MonitorError> {
        let id = parse_site_id(raw_site_id)?;
        self.site(id)?;

        let results = self.window_results(CheckQuery::between(id, now - window, now))?;
        Ok(summarize(id, &results, self.settings.incident_cap))
    }

    /// The rolling 24 hour timeline of one site.
    pub fn timeline(&self, raw_site_id: &str, now: DateTime<Utc>) -> Result<Vec<HourlyBucket>, MonitorError> {
        let id = parse_site_id(raw_site_id)?;
        self.site(id)?;

        let results = self.window_results(CheckQuery::since(id, timeline_start(now)))?;
        Ok(hourly_timeline(&results, now))
    }

    pub fn report(&self, raw_site_ids: &[String], range_days: u32, now: DateTime<Utc>) -> Result<Report, ReportError> {
        ReportBuilder::new(self.directory.as_ref(), self.store.as_ref(), self.settings.incident_cap)
            .build(raw_site_ids, range_days, now)
            .inspect_err(|e| {
                if let ReportError::Storage(e) = e {
                    tracing::error!("Failed to build report: {}", e);
                }
            })
    }

    fn window_results(&self, query: CheckQuery) -> Result<Vec<CheckResult>, MonitorError> {
        self.store.query_check_results(&query).map_err(|e| {
            tracing::error!("Failed to query checks for {}: {}", query.site_id, e);
            MonitorError::Storage(e)
        })
    }
}
