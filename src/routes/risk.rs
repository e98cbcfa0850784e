//! Risk HTTP endpoints (C0-http): a thin marshaling layer over the façade
//! (C10). No scoring logic lives here — handlers parse/validate the
//! request, call into `facade`/`scheduler`, and serialize the result.
//!
//! - GET  /api/v1/risk/route/:route_id?date=YYYY-MM-DD
//! - GET  /api/v1/risk/map?date=YYYY-MM-DD&season=rock|ice|any
//! - POST /api/v1/risk/recompute?date=YYYY-MM-DD
//! - GET  /api/v1/risk/scheduler/status

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::db::models::RiskPrediction;
use crate::errors::AppError;
use crate::facade::{self, SeasonFilter};
use crate::scheduler::{self, SchedulerStatus, SharedSchedulerStatus};
use crate::store::PgStore;
use crate::weather::provider::WeatherClient;

/// Shared application state for the risk endpoints, analogous to the
/// teacher's `AppState { pool, yr_client }`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub weather: Arc<WeatherClient>,
    pub cfg: Arc<ScoringConfig>,
    pub scheduler_status: SharedSchedulerStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DateQuery {
    /// Planning date, ISO 8601 calendar date (e.g. "2026-07-15")
    pub date: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MapQuery {
    /// Planning date, ISO 8601 calendar date
    pub date: String,
    /// Route-type season bucket: "rock" (default), "ice", or "any"
    pub season: Option<String>,
}

fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date '{s}', expected YYYY-MM-DD")))
}

/// Single-route, on-demand risk prediction.
#[utoipa::path(
    get,
    path = "/api/v1/risk/route/{route_id}",
    tag = "Risk",
    params(("route_id" = Uuid, Path, description = "Route id"), DateQuery),
    responses(
        (status = 200, description = "Risk prediction", body = RiskPrediction),
        (status = 400, description = "Invalid date or unknown route"),
    )
)]
pub async fn predict_route(
    State(state): State<AppState>,
    Path(route_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<RiskPrediction>, AppError> {
    let date = parse_date(&query.date)?;
    let prediction = facade::predict_one(
        state.store.as_ref(),
        state.weather.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        route_id,
        date,
        &state.cfg,
    )
    .await?;
    Ok(Json(prediction))
}

/// One row of the bulk map response.
#[derive(Debug, Serialize, ToSchema)]
pub struct MapEntryResponse {
    pub route_id: Uuid,
    pub prediction: Option<RiskPrediction>,
}

/// Bulk cache-backed read for map rendering. Never computes on a cache
/// miss — a route with no precomputed entry is returned with `prediction:
/// null` so the map stays responsive (§4.8).
#[utoipa::path(
    get,
    path = "/api/v1/risk/map",
    tag = "Risk",
    params(MapQuery),
    responses((status = 200, description = "Bulk risk predictions", body = [MapEntryResponse]))
)]
pub async fn map_bulk(
    State(state): State<AppState>,
    Query(query): Query<MapQuery>,
) -> Result<Json<Vec<MapEntryResponse>>, AppError> {
    let date = parse_date(&query.date)?;
    let filter = SeasonFilter::parse(query.season.as_deref().unwrap_or("rock"));
    let entries = facade::map_bulk(state.store.as_ref(), state.store.as_ref(), date, filter).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| MapEntryResponse {
                route_id: e.route_id,
                prediction: e.prediction,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecomputeResponse {
    pub date: NaiveDate,
    pub routes_scored: u64,
    pub routes_failed: u64,
}

/// Operator trigger: invoke C9 immediately for a single date, synchronously.
/// Idempotent — overwrites any existing cache entries for that date.
#[utoipa::path(
    post,
    path = "/api/v1/risk/recompute",
    tag = "Risk",
    params(("date" = String, Query, description = "Date to recompute, YYYY-MM-DD")),
    responses((status = 200, description = "Recompute summary", body = RecomputeResponse))
)]
pub async fn recompute(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Json<RecomputeResponse>, AppError> {
    let date = parse_date(&query.date)?;
    let (scored, failed) = scheduler::compute_daily(
        state.store.as_ref(),
        state.weather.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        &[date],
        &state.cfg,
    )
    .await;
    Ok(Json(RecomputeResponse {
        date,
        routes_scored: scored,
        routes_failed: failed,
    }))
}

/// Current state of the nightly precomputation scheduler.
#[utoipa::path(
    get,
    path = "/api/v1/risk/scheduler/status",
    tag = "Risk",
    responses((status = 200, description = "Scheduler status", body = SchedulerStatus))
)]
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler_status.read().await.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("not-a-date").is_err());
    }

    #[test]
    fn parse_date_accepts_iso8601() {
        assert_eq!(parse_date("2026-07-15").unwrap(), NaiveDate::from_ymd_opt(2026, 7, 15).unwrap());
    }
}
