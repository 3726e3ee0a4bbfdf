//! Configuration module for uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every duration setting, in seconds (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Interval between scheduled sweeps, in seconds (default: 300)
    pub check_interval_secs: u64,
    /// Probe timeout for user-triggered checks (default: 15)
    pub on_demand_timeout_secs: u64,
    /// Probe timeout for scheduled bulk checks (default: 10)
    pub scheduled_timeout_secs: u64,
    /// Minimum spacing between accepted checks of one site (default: 60)
    pub rate_limit_secs: u64,
    /// TTL used when a cache miss is repopulated from storage (default: 120)
    pub fallback_ttl_secs: u64,
    /// Maximum incidents listed per site summary (default: 25)
    pub incident_cap: usize,
    /// Concurrent probes during a sweep (default: 10)
    pub sweep_concurrency: usize,
    /// Whether the periodic sweep runs at all (default: true)
    pub sweep_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            check_interval_secs: 300,
            on_demand_timeout_secs: 15,
            scheduled_timeout_secs: 10,
            rate_limit_secs: 60,
            fallback_ttl_secs: 120,
            incident_cap: 25,
            sweep_concurrency: 10,
            sweep_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Every field has an `UPTRAIL_` prefixed variable (`UPTRAIL_HTTP_PORT`,
    /// `UPTRAIL_DB_PATH`, `UPTRAIL_CHECK_INTERVAL_SECS`, ...). Values that fail
    /// to parse, zero values, and durations above [`MAX_DURATION_SECS`] keep
    /// their defaults.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("UPTRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Ok(db_path) = env::var("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        set_duration(&mut cfg.check_interval_secs, "UPTRAIL_CHECK_INTERVAL_SECS");
        set_duration(&mut cfg.on_demand_timeout_secs, "UPTRAIL_ON_DEMAND_TIMEOUT_SECS");
        set_duration(&mut cfg.scheduled_timeout_secs, "UPTRAIL_SCHEDULED_TIMEOUT_SECS");
        set_duration(&mut cfg.rate_limit_secs, "UPTRAIL_RATE_LIMIT_SECS");
        set_duration(&mut cfg.fallback_ttl_secs, "UPTRAIL_FALLBACK_TTL_SECS");
        set_positive(&mut cfg.incident_cap, "UPTRAIL_INCIDENT_CAP");
        set_positive(&mut cfg.sweep_concurrency, "UPTRAIL_SWEEP_CONCURRENCY");

        if let Some(enabled) = parse_var("UPTRAIL_SWEEP_ENABLED") {
            cfg.sweep_enabled = enabled;
        }

        cfg
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Primary cache TTL: three sweep intervals, so a missed sweep or two
    /// still renders the last known status.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.saturating_mul(3))
    }

    /// TTL for entries repopulated from storage. Never longer than the
    /// primary TTL.
    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback_ttl_secs).min(self.cache_ttl())
    }

    pub fn on_demand_timeout(&self) -> Duration {
        Duration::from_secs(self.on_demand_timeout_secs)
    }

    pub fn scheduled_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduled_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> chrono::Duration {
        let secs = self.rate_limit_secs.min(MAX_DURATION_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn set_positive<T>(field: &mut T, name: &str)
where
    T: FromStr + PartialOrd + Default,
{
    if let Some(value) = parse_var::<T>(name) {
        if value > T::default() {
            *field = value;
        }
    }
}

fn set_duration(field: &mut u64, name: &str) {
    if let Some(value) = parse_var::<u64>(name) {
        if value > 0 && value <= MAX_DURATION_SECS {
            *field = value;
        } else if value > MAX_DURATION_SECS {
            tracing::warn!("{}={} exceeds {}s, keeping {}", name, value, MAX_DURATION_SECS, field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "uptrail.db");
        assert_eq!(cfg.rate_limit_secs, 60);
        assert_eq!(cfg.incident_cap, 25);
    }

    #[test]
    fn test_cache_ttl_is_three_intervals() {
        let cfg = ServerConfig {
            check_interval_secs: 60,
            ..Default::default()
        };
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(180));
        assert!(cfg.fallback_ttl() <= Duration::from_secs(120));
    }

    #[test]
    fn test_set_positive_ignores_zero_and_garbage() {
        let mut value: u64 = 42;
        env::set_var("UPTRAIL_TEST_ZERO", "0");
        set_positive(&mut value, "UPTRAIL_TEST_ZERO");
        assert_eq!(value, 42);

        env::set_var("UPTRAIL_TEST_GARBAGE", "soon");
        set_positive(&mut value, "UPTRAIL_TEST_GARBAGE");
        assert_eq!(value, 42);

        env::set_var("UPTRAIL_TEST_VALID", " 7 ");
        set_positive(&mut value, "UPTRAIL_TEST_VALID");
        assert_eq!(value, 7);
    }

    #[test]
    fn test_set_duration_rejects_oversized_values() {
        let mut value: u64 = 60;
        env::set_var("UPTRAIL_TEST_HUGE", u64::MAX.to_string());
        set_duration(&mut value, "UPTRAIL_TEST_HUGE");
        assert_eq!(value, 60);

        env::set_var("UPTRAIL_TEST_MAX", MAX_DURATION_SECS.to_string());
        set_duration(&mut value, "UPTRAIL_TEST_MAX");
        assert_eq!(value, MAX_DURATION_SECS);
    }

    #[test]
    fn test_rate_limit_window_never_negative() {
        let cfg = ServerConfig {
            rate_limit_secs: u64::MAX,
            ..Default::default()
        };
        let window = cfg.rate_limit_window();
        assert!(window > chrono::Duration::zero());
        assert_eq!(window, chrono::Duration::seconds(MAX_DURATION_SECS as i64));
    }

    #[test]
    fn test_fallback_ttl_capped_by_primary_ttl() {
        let cfg = ServerConfig {
            check_interval_secs: 20,
            fallback_ttl_secs: 120,
            ..Default::default()
        };
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.fallback_ttl(), Duration::from_secs(60));

        let cfg = ServerConfig::default();
        assert_eq!(cfg.fallback_ttl(), Duration::from_secs(120));
        assert!(cfg.fallback_ttl() < cfg.cache_ttl());
    }
}
