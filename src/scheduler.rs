//! Periodic sweep that checks every active site.
//!
//! This is only a trigger: each sweep calls [`Monitor::check`] for every
//! active site with the scheduled timeout, bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use crate::monitor::{CheckTrigger, Monitor, MonitorError};

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Checked,
    Skipped,
    Failed,
}

/// Runs sweeps on a fixed interval until stopped.
pub struct Scheduler {
    monitor: Arc<Monitor>,
    interval: Duration,
    concurrency: usize,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(monitor: Arc<Monitor>, interval: Duration, concurrency: usize) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            monitor,
            interval,
            concurrency: concurrency.max(1),
            stop_tx,
        }
    }

    /// Start the sweep loop in the background.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let monitor = self.monitor.clone();
        let concurrency = self.concurrency;
        let mut stop_rx = self.stop_tx.subscribe();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Starting scheduler: sweep every {:?}, {} concurrent checks",
            self.interval,
            concurrency
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        let stats = run_sweep(&monitor, concurrency).await;
                        tracing::info!(
                            "Sweep finished: {} checked, {} skipped, {} failed",
                            stats.checked,
                            stats.skipped,
                            stats.failed
                        );
                    }
                }
            }
            tracing::info!("Scheduler stopped");
        })
    }

    /// Stop the sweep loop after the current sweep.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

/// Check every active site once.
pub async fn run_sweep(monitor: &Arc<Monitor>, concurrency: usize) -> SweepStats {
    let mut stats = SweepStats::default();

    let sites = match monitor.store().get_active_sites() {
        Ok(sites) => sites,
        Err(e) => {
            tracing::error!("Scheduler: Failed to get sites: {}", e);
            return stats;
        }
    };

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for site in sites {
        let monitor = monitor.clone();
        let semaphore = semaphore.clone();

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Outcome::Skipped;
            };

            // Spread checks out a little so a sweep is not one burst.
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            match monitor.check(site.id, CheckTrigger::Scheduled).await {
                Ok(_) => Outcome::Checked,
                Err(MonitorError::RateLimited { .. }) | Err(MonitorError::SiteInactive(_)) => Outcome::Skipped,
                Err(e) => {
                    tracing::error!("Scheduled check failed for {}: {}", site.name, e);
                    Outcome::Failed
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Outcome::Checked) => stats.checked += 1,
            Ok(Outcome::Skipped) => stats.skipped += 1,
            Ok(Outcome::Failed) => stats.failed += 1,
            Err(e) => {
                tracing::error!("Scheduled check task panicked: {}", e);
                stats.failed += 1;
            }
        }
    }

    let purged = monitor.cache().purge_expired();
    if purged > 0 {
        tracing::debug!("Purged {} expired status cache entries", purged);
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StatusCache;
    use crate::db::Store;
    use crate::monitor::MonitorSettings;
    use tempfile::NamedTempFile;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sweep_checks_active_sites_once() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let monitor = Arc::new(Monitor::new(store, StatusCache::in_memory(), MonitorSettings::default()).unwrap());

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let active = monitor.register_site("Active", &server.uri()).unwrap();
        let paused = monitor.register_site("Paused", &server.uri()).unwrap();
        monitor.store().set_site_active(paused.id, false).unwrap();

        let stats = run_sweep(&monitor, 4).await;
        assert_eq!(stats, SweepStats { checked: 1, skipped: 0, failed: 0 });
        assert!(monitor.cache().get(active.id).is_some());
        assert!(monitor.cache().get(paused.id).is_none());

        // Within the rate limit window the next sweep skips the site.
        let stats = run_sweep(&monitor, 4).await;
        assert_eq!(stats, SweepStats { checked: 0, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_scheduler_stops() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let monitor = Arc::new(Monitor::new(store, StatusCache::in_memory(), MonitorSettings::default()).unwrap());

        let scheduler = Scheduler::new(monitor, Duration::from_secs(3600), 2);
        let handle = scheduler.start();
        scheduler.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
