//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use super::check_log::{CheckLog, CheckQuery, Order, SiteDirectory};
use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Column values of a `check_results` row before decoding.
type CheckRow = (
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<bool>,
    String,
);

/// Column values of a `sites` row before decoding.
type SiteRow = (String, String, String, bool, String, Option<String>);

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// A poisoned lock only means another thread panicked mid-statement;
    /// SQLite itself stays consistent, so keep serving.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Sites ---

    /// Add a new site.
    pub fn add_site(&self, site: &Site) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sites (id, name, url, active, status, last_checked) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site.id.to_string(),
                site.name,
                site.url,
                site.active,
                site.status.as_str(),
                site.last_checked.map(format_db_time),
            ],
        )?;
        Ok(())
    }

    /// Get a site by ID.
    pub fn get_site(&self, id: Uuid) -> Result<Site, DbError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, name, url, active, status, last_checked FROM sites WHERE id = ?1",
                params![id.to_string()],
                read_site_row,
            )
            .optional()?;

        match row {
            Some(row) => decode_site(row),
            None => Err(DbError::NotFound),
        }
    }

    /// Get all sites.
    pub fn get_sites(&self) -> Result<Vec<Site>, DbError> {
        self.select_sites("SELECT id, name, url, active, status, last_checked FROM sites ORDER BY name")
    }

    /// Get the sites a sweep should probe.
    pub fn get_active_sites(&self) -> Result<Vec<Site>, DbError> {
        self.select_sites(
            "SELECT id, name, url, active, status, last_checked FROM sites WHERE active = 1 ORDER BY name",
        )
    }

    fn select_sites(&self, sql: &str) -> Result<Vec<Site>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], read_site_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter().map(decode_site).collect()
    }

    /// Record the outcome of the latest check on the site row.
    pub fn update_site_status(
        &self,
        id: Uuid,
        status: SiteStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE sites SET status = ?1, last_checked = ?2 WHERE id = ?3",
            params![status.as_str(), format_db_time(checked_at), id.to_string()],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Pause or resume a site.
    pub fn set_site_active(&self, id: Uuid, active: bool) -> Result<(), DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE sites SET active = ?1 WHERE id = ?2",
            params![active, id.to_string()],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

impl CheckLog for Store {
    fn append_check_result(&self, result: &CheckResult) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO check_results (site_id, status, status_code, response_time_ms, error, ssl_valid, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.site_id.to_string(),
                result.status.as_str(),
                result.status_code.map(i64::from),
                result.response_time_ms.map(|ms| ms as i64),
                result.error,
                result.ssl_valid,
                format_db_time(result.checked_at),
            ],
        )?;
        Ok(())
    }

    fn query_check_results(&self, query: &CheckQuery) -> Result<Vec<CheckResult>, DbError> {
        let direction = match query.order {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        };
        // LIMIT -1 is "no limit" in SQLite.
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT site_id, status, status_code, response_time_ms, error, ssl_valid, checked_at
             FROM check_results
             WHERE site_id = ?1 AND checked_at >= ?2 AND (?3 IS NULL OR checked_at < ?3)
             ORDER BY checked_at {direction}, id {direction} LIMIT ?4"
        ))?;

        let rows = stmt
            .query_map(
                params![
                    query.site_id.to_string(),
                    format_db_time(query.start),
                    query.end.map(format_db_time),
                    limit,
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )?
            .collect::<SqlResult<Vec<CheckRow>>>()?;

        rows.into_iter().map(decode_check_result).collect()
    }
}

impl SiteDirectory for Store {
    /// The store is single-tenant: every stored site is visible.
    fn find_site(&self, id: Uuid) -> Result<Option<Site>, DbError> {
        match self.get_site(id) {
            Ok(site) => Ok(Some(site)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn read_site_row(row: &rusqlite::Row<'_>) -> SqlResult<SiteRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_site(row: SiteRow) -> Result<Site, DbError> {
    let (id, name, url, active, status, last_checked) = row;
    Ok(Site {
        id: Uuid::parse_str(&id).map_err(|e| DbError::Corrupt(format!("site id {}: {}", id, e)))?,
        name,
        url,
        active,
        status: status.parse().map_err(DbError::Corrupt)?,
        last_checked: last_checked.as_deref().and_then(parse_db_time),
    })
}

fn decode_check_result(row: CheckRow) -> Result<CheckResult, DbError> {
    let (site_id, status, status_code, response_time_ms, error, ssl_valid, checked_at) = row;
    Ok(CheckResult {
        site_id: Uuid::parse_str(&site_id)
            .map_err(|e| DbError::Corrupt(format!("site id {}: {}", site_id, e)))?,
        status: status.parse().map_err(DbError::Corrupt)?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        response_time_ms: response_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        error,
        ssl_valid,
        checked_at: parse_db_time(&checked_at)
            .ok_or_else(|| DbError::Corrupt(format!("timestamp {}", checked_at)))?,
    })
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    fn result_at(site_id: Uuid, status: CheckStatus, checked_at: DateTime<Utc>) -> CheckResult {
        CheckResult {
            site_id,
            status,
            status_code: if status.is_up() { Some(200) } else { None },
            response_time_ms: if status.is_up() { Some(85) } else { None },
            error: if status.is_up() { None } else { Some("timeout".to_string()) },
            ssl_valid: None,
            checked_at,
        }
    }

    #[test]
    fn test_site_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let site = Site::new("Example", "https://example.com");
        store.add_site(&site).unwrap();

        let fetched = store.get_site(site.id).unwrap();
        assert_eq!(fetched.name, "Example");
        assert_eq!(fetched.status, SiteStatus::Unknown);
        assert!(fetched.last_checked.is_none());

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        store.update_site_status(site.id, SiteStatus::Down, now).unwrap();
        let fetched = store.get_site(site.id).unwrap();
        assert_eq!(fetched.status, SiteStatus::Down);
        assert_eq!(fetched.last_checked, Some(now));

        store.set_site_active(site.id, false).unwrap();
        assert!(store.get_active_sites().unwrap().is_empty());
        assert_eq!(store.get_sites().unwrap().len(), 1);

        assert!(matches!(store.get_site(Uuid::new_v4()), Err(DbError::NotFound)));
        assert!(store.find_site(Uuid::new_v4()).unwrap().is_none());
        assert!(matches!(
            store.update_site_status(Uuid::new_v4(), SiteStatus::Up, now),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_check_results_range_and_order() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let site_id = Uuid::new_v4();
        let other_site = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        // Appended out of order on purpose.
        for minutes in [30, 10, 20, 40] {
            store
                .append_check_result(&result_at(site_id, CheckStatus::Up, base + Duration::minutes(minutes)))
                .unwrap();
        }
        store
            .append_check_result(&result_at(other_site, CheckStatus::Down, base + Duration::minutes(15)))
            .unwrap();

        let window = CheckQuery::between(site_id, base + Duration::minutes(10), base + Duration::minutes(40));
        let results = store.query_check_results(&window).unwrap();
        let times: Vec<_> = results.iter().map(|r| r.checked_at).collect();
        assert_eq!(
            times,
            vec![
                base + Duration::minutes(10),
                base + Duration::minutes(20),
                base + Duration::minutes(30),
            ]
        );
        assert!(results.iter().all(|r| r.site_id == site_id));

        let newest = store
            .query_check_results(&CheckQuery::since(site_id, base).newest_first().limit(2))
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].checked_at, base + Duration::minutes(40));
        assert_eq!(newest[1].checked_at, base + Duration::minutes(30));

        let latest = store.latest_check_result(other_site).unwrap().unwrap();
        assert_eq!(latest.status, CheckStatus::Down);
        assert_eq!(latest.error.as_deref(), Some("timeout"));
        assert!(store.latest_check_result(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_check_result_roundtrip_keeps_nullable_fields() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let checked_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let result = CheckResult {
            site_id: Uuid::new_v4(),
            status: CheckStatus::Down,
            status_code: Some(503),
            response_time_ms: Some(40),
            error: Some("HTTP 503".to_string()),
            ssl_valid: Some(true),
            checked_at,
        };
        store.append_check_result(&result).unwrap();
        assert_eq!(store.latest_check_result(result.site_id).unwrap(), Some(result));
    }

    #[test]
    fn test_parse_db_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_db_time("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_db_time("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_db_time(&format_db_time(expected)), Some(expected));
        assert_eq!(parse_db_time("yesterday"), None);
    }
}
