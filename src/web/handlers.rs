//! HTTP request handlers.

use super::AppState;
use crate::db::CheckResult;
use crate::monitor::{CheckTrigger, MonitorError};
use crate::report::ReportError;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Longest uptime window served, in hours.
const MAX_UPTIME_HOURS: i64 = 24 * 365;

// ============================================================================
// Errors
// ============================================================================

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Map a monitor error to its HTTP response. Rate limiting is an expected
/// outcome and carries the time the next check is allowed.
pub fn monitor_error_response(e: MonitorError) -> Response {
    match e {
        MonitorError::RateLimited { next_check_allowed } => {
            let retry_after = (next_check_allowed - Utc::now()).num_seconds().max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Site was checked recently",
                    "nextCheckAllowed": next_check_allowed,
                })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        MonitorError::Validation(_) | MonitorError::Probe(_) => {
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        MonitorError::SiteNotFound(_) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        MonitorError::SiteInactive(_) => error_body(StatusCode::CONFLICT, e.to_string()),
        MonitorError::Storage(_) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn report_error_response(e: ReportError) -> Response {
    let status = match e {
        ReportError::Validation(_) => StatusCode::BAD_REQUEST,
        ReportError::SiteNotFound(_) => StatusCode::NOT_FOUND,
        ReportError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, e.to_string())
}

/// Split a comma separated id list, dropping empty entries.
fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// API: Sites
// ============================================================================

pub async fn handle_get_sites(State(state): State<AppState>) -> Response {
    match state.monitor.sites() {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    pub url: String,
}

pub async fn handle_create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Site name is required".to_string());
    }

    match state.monitor.register_site(&req.name, &req.url) {
        Ok(site) => (StatusCode::CREATED, Json(site)).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

// ============================================================================
// API: Checks
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub status: String,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub ssl_valid: Option<bool>,
    pub checked_at: DateTime<Utc>,
}

impl From<CheckResult> for CheckResponse {
    fn from(result: CheckResult) -> Self {
        Self {
            status: result.status.to_string(),
            response_time_ms: result.response_time_ms,
            status_code: result.status_code,
            error: result.error,
            ssl_valid: result.ssl_valid,
            checked_at: result.checked_at,
        }
    }
}

pub async fn handle_check_site(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.monitor.check_site(&id, CheckTrigger::OnDemand).await {
        Ok(result) => Json(CheckResponse::from(result)).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub ids: String,
}

pub async fn handle_status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Response {
    let ids = split_ids(&query.ids);
    match state.monitor.statuses(&ids).await {
        Ok(statuses) => Json(statuses).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default)]
    pub hours: Option<i64>,
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UptimeQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(24);
    if !(1..=MAX_UPTIME_HOURS).contains(&hours) {
        return error_body(
            StatusCode::BAD_REQUEST,
            format!("hours must be between 1 and {}", MAX_UPTIME_HOURS),
        );
    }

    match state.monitor.uptime(&id, ChronoDuration::hours(hours), Utc::now()) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

pub async fn handle_timeline(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.monitor.timeline(&id, Utc::now()) {
        Ok(buckets) => Json(buckets).into_response(),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub ids: String,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn handle_report(State(state): State<AppState>, Query(query): Query<ReportQuery>) -> Response {
    let ids = split_ids(&query.ids);
    let days = query.days.unwrap_or(30);

    let report = match state.monitor.report(&ids, days, Utc::now()) {
        Ok(report) => report,
        Err(e) => return report_error_response(e),
    };

    match query.format.as_deref() {
        Some("csv") => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"uptime-report.csv\""),
            ],
            report.to_csv(),
        )
            .into_response(),
        None | Some("json") => Json(report).into_response(),
        Some(other) => error_body(StatusCode::BAD_REQUEST, format!("Unsupported format: {}", other)),
    }
}
