//! Multi-site uptime reports and their CSV export.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{summarize, Incident, UptimeSummary};
use crate::db::{parse_site_id, CheckLog, CheckQuery, DbError, SiteDirectory, ValidationError};

/// Longest report range accepted, in days.
pub const MAX_RANGE_DAYS: u32 = 365;

const SUMMARY_HEADER: &str =
    "Site,Date Range,Uptime %,Total Checks,Up,Down,Avg Response (ms),Min Response (ms),Max Response (ms)";
const INCIDENT_HEADER: &str = "Site,Timestamp,Status Code,Response Time (ms),Error Message";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("site not found: {0}")]
    SiteNotFound(Uuid),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Summary of one site within a report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteReport {
    pub site_id: Uuid,
    pub site_name: String,
    pub url: String,
    pub summary: UptimeSummary,
}

/// Incident row of the flattened incident table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIncident {
    pub site_name: String,
    #[serde(flatten)]
    pub incident: Incident,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub range_days: u32,
    pub sites: Vec<SiteReport>,
    pub incidents: Vec<ReportIncident>,
}

/// Builds reports from the site directory and the check log.
pub struct ReportBuilder<'a> {
    sites: &'a dyn SiteDirectory,
    log: &'a dyn CheckLog,
    incident_cap: usize,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(sites: &'a dyn SiteDirectory, log: &'a dyn CheckLog, incident_cap: usize) -> Self {
        Self {
            sites,
            log,
            incident_cap,
        }
    }

    /// Summarize each requested site over the last `range_days` days.
    ///
    /// Every id is validated before any storage read, so a bad id fails the
    /// whole report. Duplicate ids are reported once.
    pub fn build(&self, site_ids: &[String], range_days: u32, now: DateTime<Utc>) -> Result<Report, ReportError> {
        if range_days == 0 || range_days > MAX_RANGE_DAYS {
            return Err(ValidationError::InvalidRange(format!(
                "range must be between 1 and {} days, got {}",
                MAX_RANGE_DAYS, range_days
            ))
            .into());
        }

        let mut ids: Vec<Uuid> = Vec::with_capacity(site_ids.len());
        for raw in site_ids {
            let id = parse_site_id(raw)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let start = now - Duration::days(range_days as i64);
        let mut sites = Vec::with_capacity(ids.len());
        let mut incidents = Vec::new();

        for id in ids {
            let site = self.sites.find_site(id)?.ok_or(ReportError::SiteNotFound(id))?;
            let results = self.log.query_check_results(&CheckQuery::between(id, start, now))?;
            let summary = summarize(id, &results, self.incident_cap);

            incidents.extend(summary.incidents.iter().map(|incident| ReportIncident {
                site_name: site.name.clone(),
                incident: incident.clone(),
            }));

            sites.push(SiteReport {
                site_id: id,
                site_name: site.name,
                url: site.url,
                summary,
            });
        }

        tracing::info!(
            "Built report for {} sites over {} days ({} incidents)",
            sites.len(),
            range_days,
            incidents.len()
        );

        Ok(Report {
            start,
            end: now,
            range_days,
            sites,
            incidents,
        })
    }
}

impl Report {
    /// "YYYY-MM-DD to YYYY-MM-DD"
    pub fn date_range(&self) -> String {
        format!("{} to {}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }

    /// Summary table, a blank line, then the incident table.
    pub fn to_csv(&self) -> String {
        let date_range = self.date_range();
        let mut out = String::new();

        out.push_str(SUMMARY_HEADER);
        out.push('\n');
        for site in &self.sites {
            let s = &site.summary;
            let row = [
                csv_field(&site.site_name),
                csv_field(&date_range),
                format!("{:.2}", s.uptime_percent),
                s.total_checks.to_string(),
                s.up_count.to_string(),
                s.down_count.to_string(),
                s.avg_response_ms.map(|avg| format!("{:.0}", avg)).unwrap_or_default(),
                optional(s.min_response_ms),
                optional(s.max_response_ms),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }

        out.push('\n');
        out.push_str(INCIDENT_HEADER);
        out.push('\n');
        for row in &self.incidents {
            let i = &row.incident;
            let fields = [
                csv_field(&row.site_name),
                i.timestamp.to_rfc3339(),
                optional(i.status_code),
                optional(i.response_time_ms),
                csv_field(i.error.as_deref().unwrap_or("")),
            ];
            out.push_str(&fields.join(","));
            out.push('\n');
        }

        out
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Quote a field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
