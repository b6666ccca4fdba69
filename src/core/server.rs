use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

use super::health::HealthChecker;
use super::metrics::ScanMetrics;
use crate::monitoring::records::{ViolationFilter, ViolationStatus};
use crate::monitoring::reporter::ViolationReporter;
use crate::scanner::scheduler::ScanScheduler;

const DEFAULT_QUERY_LIMIT: usize = 100;
const MAX_QUERY_LIMIT: usize = 1000;

/// Everything the HTTP handlers read from.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ScanScheduler>,
    pub reporter: Arc<ViolationReporter>,
    pub health: HealthChecker,
    pub metrics: Arc<ScanMetrics>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViolationQuery {
    pub brand: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ViolationQuery {
    fn filter(&self) -> Result<ViolationFilter, String> {
        let mut filter = ViolationFilter::default();
        if let Some(brand) = self.brand.as_deref().filter(|b| !b.is_empty()) {
            filter = filter.brand(brand);
        }
        if let Some(status) = &self.status {
            filter = filter.status(status.parse()?);
        }
        if let Some(since) = self.since {
            filter = filter.since(since);
        }
        Ok(filter)
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: ViolationStatus,
}

type JsonReply = WithStatus<Json>;

fn reply(value: &impl serde::Serialize, status: StatusCode) -> JsonReply {
    warp::reply::with_status(warp::reply::json(value), status)
}

fn error_reply(message: impl std::fmt::Display, status: StatusCode) -> JsonReply {
    reply(&json!({ "error": message.to_string() }), status)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health_handler);

    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| {
            warp::reply::with_header(
                state.metrics.render(),
                "content-type",
                "text/plain; version=0.0.4",
            )
        });

    let scan = warp::path("scan")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(scan_handler);

    let violations = warp::path("violations")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<ViolationQuery>())
        .and(with_state(state.clone()))
        .and_then(violations_handler);

    let violation_status = warp::path!("violations" / i64 / "status")
        .and(warp::post())
        .and(warp::body::json::<StatusUpdate>())
        .and(with_state(state.clone()))
        .and_then(status_handler);

    let blacklisted = warp::path!("vendors" / "blacklisted")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(blacklisted_handler);

    let vendor_summary = warp::path!("vendors" / "summary")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(vendor_summary_handler);

    let product_summary = warp::path!("products" / "summary")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(product_summary_handler);

    let report = warp::path("report")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .and_then(report_handler);

    health
        .or(metrics)
        .or(scan)
        .or(violations)
        .or(violation_status)
        .or(blacklisted)
        .or(vendor_summary)
        .or(product_summary)
        .or(report)
}

pub async fn serve(state: AppState, port: u16) {
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;
}

async fn health_handler(state: AppState) -> Result<JsonReply, Infallible> {
    let status = state.health.get_status().await;
    Ok(reply(&status, StatusCode::OK))
}

/// Claims the cycle before answering, then runs it in the background.
async fn scan_handler(state: AppState) -> Result<JsonReply, Infallible> {
    let permit = match state.scheduler.try_begin() {
        Ok(permit) => permit,
        Err(e) => return Ok(error_reply(e, StatusCode::CONFLICT)),
    };

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run(permit).await {
            tracing::warn!("Manual scan did not complete: {}", e);
        }
    });

    Ok(reply(&json!({ "accepted": true }), StatusCode::ACCEPTED))
}

async fn violations_handler(
    query: ViolationQuery,
    state: AppState,
) -> Result<JsonReply, Infallible> {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(e) => return Ok(error_reply(e, StatusCode::BAD_REQUEST)),
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .min(MAX_QUERY_LIMIT);

    match state.scheduler.context().store.query(&filter, limit).await {
        Ok(records) => Ok(reply(&records, StatusCode::OK)),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn status_handler(
    id: i64,
    update: StatusUpdate,
    state: AppState,
) -> Result<JsonReply, Infallible> {
    match state
        .scheduler
        .context()
        .store
        .update_status(id, update.status)
        .await
    {
        Ok(true) => Ok(reply(
            &json!({ "id": id, "status": update.status }),
            StatusCode::OK,
        )),
        Ok(false) => Ok(error_reply(
            format!("violation {} not found", id),
            StatusCode::NOT_FOUND,
        )),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn blacklisted_handler(state: AppState) -> Result<JsonReply, Infallible> {
    match state.scheduler.context().ledger.list_blacklisted().await {
        Ok(vendors) => Ok(reply(&vendors, StatusCode::OK)),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn vendor_summary_handler(state: AppState) -> Result<JsonReply, Infallible> {
    match state.scheduler.context().store.aggregate_by_vendor().await {
        Ok(summary) => Ok(reply(&summary, StatusCode::OK)),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn product_summary_handler(state: AppState) -> Result<JsonReply, Infallible> {
    match state.scheduler.context().store.aggregate_by_product().await {
        Ok(summary) => Ok(reply(&summary, StatusCode::OK)),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn report_handler(state: AppState) -> Result<JsonReply, Infallible> {
    match state.reporter.generate_summary().await {
        Ok(summary) => Ok(reply(&summary, StatusCode::OK)),
        Err(e) => Ok(error_reply(e, StatusCode::INTERNAL_SERVER_ERROR)),
    }
}
