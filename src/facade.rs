//! Query façade (C10): the two public operations the rest of the system
//! (HTTP layer, ops tooling) actually calls — `predict_one` (read-through
//! on-demand cache) and `map_bulk` (bulk cache read, never computes on
//! miss). `recompute` is the operator trigger that invokes C9 directly.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::db::models::{RiskPrediction, RouteType};
use crate::errors::AppError;
use crate::scorer;
use crate::store::{LocationStatsCache, ResultCache, SpatialStore, WeatherProvider};

/// §4.9's `{season: rock|ice|any}` filter for `map_bulk`, applied against
/// each route's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonFilter {
    Rock,
    Ice,
    Any,
}

impl SeasonFilter {
    pub fn parse(s: &str) -> Self {
        match s {
            "ice" => SeasonFilter::Ice,
            "any" => SeasonFilter::Any,
            _ => SeasonFilter::Rock,
        }
    }

    fn matches(self, route_type: RouteType) -> bool {
        match self {
            SeasonFilter::Any => true,
            SeasonFilter::Ice => matches!(route_type, RouteType::Ice | RouteType::Mixed),
            SeasonFilter::Rock => !matches!(route_type, RouteType::Ice),
        }
    }
}

/// `predict_one` (§4.9): read-through on the on-demand cache; on miss,
/// compute via C6 and write back with the 1h on-demand TTL.
///
/// `route_id` must resolve to a known route (§7 `InputInvalid` if not) —
/// resolving arbitrary coordinates on demand (as opposed to a registered
/// route) is left to future ingestion-side work, out of this core's scope.
pub async fn predict_one<S, W, L, C>(
    store: &S,
    weather: &W,
    stats_cache: &L,
    result_cache: &C,
    route_id: Uuid,
    date: NaiveDate,
    cfg: &ScoringConfig,
) -> Result<RiskPrediction, AppError>
where
    S: SpatialStore,
    W: WeatherProvider,
    L: LocationStatsCache,
    C: ResultCache,
{
    if let Some(cached) = result_cache.get_one(route_id, date).await? {
        return Ok(cached);
    }

    let route = store
        .get_route(route_id)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("unknown route id {route_id}")))?;

    let prediction = scorer::score_route(store, weather, stats_cache, &route, date, cfg).await?;

    // Cache failure degrades to direct compute (§7): log and return the
    // freshly computed prediction regardless of whether the write lands.
    if let Err(e) = result_cache
        .set_one(&prediction, cfg.result_cache_on_demand_ttl_hours)
        .await
    {
        tracing::warn!("predict_one: failed to cache prediction for {}/{}: {}", route_id, date, e);
    }

    Ok(prediction)
}

/// One row of a `map_bulk` response: a route id with its cached prediction,
/// or `null` if there was no unexpired cache entry for it. Never triggers
/// an on-demand compute (§4.8 invariant: "a missing bulk entry must not
/// trigger on-demand compute during a bulk read").
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub route_id: Uuid,
    pub prediction: Option<RiskPrediction>,
}

/// `map_bulk` (§4.9): enumerate route ids matching `filter`, bulk-read the
/// result cache, and return each with its prediction or `None`. A single
/// bulk round-trip regardless of route count — this is the "one bulk map
/// request ≈ cache lookup" latency target from §1.
pub async fn map_bulk<S, C>(
    store: &S,
    result_cache: &C,
    date: NaiveDate,
    filter: SeasonFilter,
) -> Result<Vec<MapEntry>, AppError>
where
    S: SpatialStore,
    C: ResultCache,
{
    let mut matching_routes = Vec::new();
    let mut after = None;
    loop {
        let page = store.routes_bulk(after, 1000).await?;
        if page.is_empty() {
            break;
        }
        after = page.last().map(|r| r.id);
        matching_routes.extend(page.into_iter().filter(|r| filter.matches(r.route_type)));
    }

    let pairs: Vec<(Uuid, NaiveDate)> = matching_routes.iter().map(|r| (r.id, date)).collect();
    let predictions = result_cache.get_many(&pairs).await?;

    Ok(matching_routes
        .into_iter()
        .zip(predictions)
        .map(|(route, prediction)| MapEntry {
            route_id: route.id,
            prediction,
        })
        .collect())
}
