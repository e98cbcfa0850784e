//! Scorer (C6): combines the C5 kernels into a per-accident influence,
//! sums and normalizes into a risk score, and delegates to C7 for
//! confidence. Pure orchestration — no SQL, no HTTP — so it takes
//! pre-fetched candidates/weather rather than reaching into C2/C3 itself;
//! `score_route` below is the thin async wrapper that does the fetching
//! and is what the façade (C10) and scheduler (C9) actually call.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::confidence::{self, CandidateSummary};
use crate::db::models::{
    Accident, AccidentWeatherWindow, Contribution, LocationStats, Route, Severity,
    WeatherForecastWindow,
};
use crate::errors::AppError;
use crate::geo::{self, Coord};
use crate::kernels;
use crate::store::{LocationStatsCache, SpatialStore, WeatherProvider};
use crate::weather::stats as weather_stats;

/// Per-accident kernel breakdown plus the resulting influence, computed by
/// `score_candidates` and either surfaced in the top-K contributions or fed
/// to the confidence model.
struct ScoredCandidate {
    accident: Accident,
    spatial: f64,
    temporal: f64,
    weather: f64,
    route_type: f64,
    severity: f64,
    elevation: f64,
    influence: f64,
}

impl ScoredCandidate {
    fn into_contribution(self) -> Contribution {
        Contribution {
            accident_id: self.accident.id,
            influence: self.influence,
            spatial: self.spatial,
            temporal: self.temporal,
            weather: self.weather,
            route_type: self.route_type,
            severity: self.severity,
            elevation: self.elevation,
        }
    }
}

/// §4.5 step 4: per-accident influence `I = w_s * w_t * w_w^P * w_rt * w_sev * w_e`.
fn score_one_candidate(
    route: &Route,
    planning_date: NaiveDate,
    accident: &Accident,
    window: Option<&AccidentWeatherWindow>,
    forecast: Option<&WeatherForecastWindow>,
    stats: Option<&LocationStats>,
    cfg: &ScoringConfig,
) -> ScoredCandidate {
    let route_coord = Coord::new(route.latitude, route.longitude);
    let accident_coord = Coord::new(
        crate::helpers::dec_to_f64(accident.latitude),
        crate::helpers::dec_to_f64(accident.longitude),
    );
    let accident_elevation = crate::helpers::opt_dec_to_f64(accident.elevation_m);
    let severity = Severity::parse(&accident.severity);
    let planning_type = route.route_type;
    let accident_type = crate::db::models::RouteType::parse(&accident.activity);

    let spatial = kernels::spatial_weight(route_coord, accident_coord, planning_type, cfg);
    let temporal = kernels::temporal_weight(planning_date, accident.occurred_on, planning_type, cfg);
    let route_type = kernels::route_type_weight(planning_type, accident_type, cfg);
    let severity_w = kernels::severity_weight(severity, cfg);
    let elevation = kernels::elevation_weight(route.elevation_m, accident_elevation, planning_type, cfg);

    // §4.4.6 policy: forecast unavailable ⇒ neutral 0.5. Otherwise the
    // kernel itself handles an empty/absent accident window (n == 0 ⇒ 0.5).
    let weather = match forecast {
        Some(f) => {
            let empty = Vec::new();
            let accident_days = window.map(|w| &w.days).unwrap_or(&empty);
            kernels::weather_weight(&f.days, accident_days, stats, cfg)
        }
        None => 0.5,
    };

    let influence = spatial
        * temporal
        * weather.powi(cfg.weather_power)
        * route_type
        * severity_w
        * elevation;

    ScoredCandidate {
        accident: accident.clone(),
        spatial,
        temporal,
        weather,
        route_type,
        severity: severity_w,
        elevation,
        influence,
    }
}

/// Scalar reference path for §4.5 steps 3-8, given pre-fetched candidates
/// and weather context. Deterministic: same inputs always give the same
/// output (up to float-associativity), independent of candidate order
/// (§8 order-independence property).
pub fn score_candidates(
    route: &Route,
    planning_date: NaiveDate,
    accidents: &[Accident],
    windows: &std::collections::HashMap<Uuid, AccidentWeatherWindow>,
    forecast: Option<&WeatherForecastWindow>,
    stats: Option<&LocationStats>,
    computed_at: chrono::DateTime<Utc>,
    cfg: &ScoringConfig,
) -> crate::db::models::RiskPrediction {
    if accidents.is_empty() {
        return crate::db::models::RiskPrediction::empty(route.id, planning_date, computed_at);
    }

    let route_coord = Coord::new(route.latitude, route.longitude);

    let mut scored: Vec<ScoredCandidate> = accidents
        .iter()
        .map(|a| {
            score_one_candidate(
                route,
                planning_date,
                a,
                windows.get(&a.id),
                forecast,
                stats,
                cfg,
            )
        })
        .collect();

    let total_risk: f64 = scored.iter().map(|c| c.influence).sum();
    let risk_score = (total_risk * cfg.normalization_k).min(100.0);

    let summaries: Vec<CandidateSummary> = scored
        .iter()
        .map(|c| {
            let accident_coord = Coord::new(
                crate::helpers::dec_to_f64(c.accident.latitude),
                crate::helpers::dec_to_f64(c.accident.longitude),
            );
            let window = windows.get(&c.accident.id);
            CandidateSummary {
                influence: c.influence,
                bearing_deg: geo::bearing_deg(route_coord, accident_coord),
                distance_km: geo::haversine_km(route_coord, accident_coord),
                accident_date: c.accident.occurred_on,
                has_usable_weather_window: window.is_some_and(|w| w.is_usable()),
                weather_weight: c.weather,
            }
        })
        .collect();
    let confidence = confidence::compute(&summaries, cfg);

    // Top-K by influence, ties broken by accident id ascending (§5).
    scored.sort_by(|a, b| {
        b.influence
            .partial_cmp(&a.influence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.accident.id.cmp(&b.accident.id))
    });
    let contributions: Vec<Contribution> = scored
        .into_iter()
        .take(cfg.top_k_contributions)
        .map(ScoredCandidate::into_contribution)
        .collect();

    crate::db::models::RiskPrediction {
        route_id: route.id,
        date: planning_date,
        risk_score,
        confidence,
        contributions,
        computed_at,
    }
}

/// Full §4.5 pipeline: fetch candidates (C2), weather windows (C2),
/// forecast + stats (C3/C4), then reduce via `score_candidates`.
///
/// `StorageUnavailable` from the spatial store is fatal to the call
/// (§7: "Spatial-store failure in `predict_one` is fatal"); weather
/// provider failures degrade to neutral weights and never surface here.
pub async fn score_route<S, W, L>(
    store: &S,
    weather: &W,
    stats_cache: &L,
    route: &Route,
    planning_date: NaiveDate,
    cfg: &ScoringConfig,
) -> Result<crate::db::models::RiskPrediction, AppError>
where
    S: SpatialStore,
    W: WeatherProvider,
    L: LocationStatsCache,
{
    score_route_with_prefetch(store, weather, stats_cache, route, planning_date, None, None, cfg).await
}

/// Same pipeline as `score_route`, but lets a caller supply an
/// already-fetched forecast/stats pair instead of hitting C3/C4 again.
///
/// This is what lets the scheduler (C9) honor §4.7 step 3: routes sharing
/// a coordinate bucket reuse one forecast fetch and one LocationStats
/// lookup rather than one each. `score_route` above is just this function
/// with both prefetch slots empty (the on-demand, single-route path has
/// no bucket to share with).
pub async fn score_route_with_prefetch<S, W, L>(
    store: &S,
    weather: &W,
    stats_cache: &L,
    route: &Route,
    planning_date: NaiveDate,
    prefetched_forecast: Option<&WeatherForecastWindow>,
    prefetched_stats: Option<&LocationStats>,
    cfg: &ScoringConfig,
) -> Result<crate::db::models::RiskPrediction, AppError>
where
    S: SpatialStore,
    W: WeatherProvider,
    L: LocationStatsCache,
{
    let computed_at = Utc::now();
    let route_coord = Coord::new(route.latitude, route.longitude);
    let since = planning_date - chrono::Duration::days(cfg.candidate_window_days);

    let accidents = store
        .accidents_within(route_coord, cfg.candidate_radius_km, Some(since))
        .await?;

    if accidents.is_empty() {
        return Ok(crate::db::models::RiskPrediction::empty(route.id, planning_date, computed_at));
    }

    let accident_ids: Vec<Uuid> = accidents.iter().map(|a| a.id).collect();
    let windows = store.weather_windows_for(&accident_ids).await?;

    let owned_forecast;
    let forecast = match prefetched_forecast {
        Some(f) => Some(f),
        None => {
            owned_forecast = weather.forecast_window(route_coord, planning_date).await;
            owned_forecast.as_ref()
        }
    };
    let owned_stats;
    let stats = match prefetched_stats {
        Some(s) => Some(s),
        None => {
            owned_stats =
                fetch_or_build_stats(weather, stats_cache, route_coord, route.elevation_m, planning_date, cfg).await;
            owned_stats.as_ref()
        }
    };

    Ok(score_candidates(
        route,
        planning_date,
        &accidents,
        &windows,
        forecast,
        stats,
        computed_at,
        cfg,
    ))
}

/// Fetch the forecast/stats pair once for a coordinate bucket, so every
/// route in that bucket can be scored via `score_route_with_prefetch`
/// without re-hitting C3/C4. Uses the bucket's first route as the
/// representative coordinate/elevation (§4.7 step 3).
pub async fn prefetch_bucket_context<W, L>(
    weather: &W,
    stats_cache: &L,
    representative: &Route,
    planning_date: NaiveDate,
    cfg: &ScoringConfig,
) -> (Option<WeatherForecastWindow>, Option<LocationStats>)
where
    W: WeatherProvider,
    L: LocationStatsCache,
{
    let coord = Coord::new(representative.latitude, representative.longitude);
    let forecast = weather.forecast_window(coord, planning_date).await;
    let stats = fetch_or_build_stats(weather, stats_cache, coord, representative.elevation_m, planning_date, cfg).await;
    (forecast, stats)
}

/// C4 read-through: fetch cached `LocationStats` or build them from a
/// 5-year archive fetch. Archive failures are cached as a short-TTL
/// "unavailable" sentinel (§4.3 step 5) so a down provider doesn't get
/// re-hit by every subsequent lookup for the same key within the window —
/// the caller just proceeds without stats either way (neutral skip of
/// extreme-weather amplification).
async fn fetch_or_build_stats<W, L>(
    weather: &W,
    stats_cache: &L,
    coord: Coord,
    elevation_m: Option<f64>,
    planning_date: NaiveDate,
    cfg: &ScoringConfig,
) -> Option<LocationStats>
where
    W: WeatherProvider,
    L: LocationStatsCache,
{
    let key = weather_stats::cache_key(coord, elevation_m, planning_date);
    if let Ok(Some(cached)) = stats_cache.get(key).await {
        return Some(cached);
    }
    if matches!(stats_cache.is_unavailable(key).await, Ok(true)) {
        return None;
    }

    let end = planning_date;
    let start = end - chrono::Duration::days(365 * 5);
    let Some(daily) = weather.archive_daily(coord, start, end).await else {
        let _ = stats_cache
            .set_unavailable(key, weather_stats::UNAVAILABLE_SENTINEL_TTL_MINUTES)
            .await;
        return None;
    };
    let dated: Vec<(NaiveDate, crate::db::models::DailySample)> = daily
        .into_iter()
        .enumerate()
        .map(|(i, s)| (start + chrono::Duration::days(i as i64), s))
        .collect();

    let Some(built) = weather_stats::build(&dated, planning_date.format("%m").to_string().parse().unwrap_or(1), cfg)
    else {
        let _ = stats_cache
            .set_unavailable(key, weather_stats::UNAVAILABLE_SENTINEL_TTL_MINUTES)
            .await;
        return None;
    };
    let _ = stats_cache.set(key, &built, cfg.location_stats_ttl_hours).await;
    Some(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RouteType;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn route(id: Uuid, lat: f64, lon: f64, rt: RouteType, elevation: Option<f64>) -> Route {
        Route {
            id,
            latitude: lat,
            longitude: lon,
            elevation_m: elevation,
            route_type: rt,
        }
    }

    fn accident(id: Uuid, lat: f64, lon: f64, date: NaiveDate, activity: &str, severity: &str) -> Accident {
        Accident {
            id,
            occurred_on: date,
            latitude: Decimal::from_str(&lat.to_string()).unwrap(),
            longitude: Decimal::from_str(&lon.to_string()).unwrap(),
            elevation_m: None,
            activity: activity.to_string(),
            severity: severity.to_string(),
        }
    }

    #[test]
    fn empty_region_yields_zero_risk_and_confidence() {
        let cfg = ScoringConfig::from_env();
        let r = route(Uuid::new_v4(), 28.5, -81.4, RouteType::Sport, None);
        let prediction = score_candidates(
            &r,
            NaiveDate::from_ymd_opt(2026, 7, 15).unwrap(),
            &[],
            &HashMap::new(),
            None,
            None,
            Utc::now(),
            &cfg,
        );
        assert_eq!(prediction.risk_score, 0.0);
        assert_eq!(prediction.confidence, 0.0);
        assert!(prediction.contributions.is_empty());
    }

    #[test]
    fn risk_is_bounded_at_100() {
        let cfg = ScoringConfig::from_env();
        let r = route(Uuid::new_v4(), 40.255, -105.615, RouteType::Alpine, None);
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let accidents: Vec<Accident> = (0..200)
            .map(|i| accident(Uuid::new_v4(), 40.255, -105.615, date, "alpine", "fatal"))
            .collect();
        let prediction = score_candidates(&r, date, &accidents, &HashMap::new(), None, None, Utc::now(), &cfg);
        assert!(prediction.risk_score <= 100.0);
        assert!(prediction.risk_score >= 80.0, "expected high risk, got {}", prediction.risk_score);
    }

    #[test]
    fn order_independence_swapping_two_accidents() {
        let cfg = ScoringConfig::from_env();
        let r = route(Uuid::new_v4(), 46.5, 7.9, RouteType::Trad, None);
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let a1 = accident(Uuid::new_v4(), 46.51, 7.91, date - chrono::Duration::days(100), "trad", "minor");
        let a2 = accident(Uuid::new_v4(), 46.52, 7.92, date - chrono::Duration::days(500), "sport", "serious");

        let forward = score_candidates(&r, date, &[a1.clone(), a2.clone()], &HashMap::new(), None, None, Utc::now(), &cfg);
        let backward = score_candidates(&r, date, &[a2, a1], &HashMap::new(), None, None, Utc::now(), &cfg);
        assert!((forward.risk_score - backward.risk_score).abs() < 1e-9);
    }

    #[test]
    fn canary_effect_sport_vs_alpine_accident_near_alpine_route() {
        let cfg = ScoringConfig::from_env();
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let r = route(Uuid::new_v4(), 40.0, -105.0, RouteType::Alpine, None);

        // distance_km ~ 5km at this latitude for ~0.045 deg lon.
        let sport_accident = accident(Uuid::new_v4(), 40.045, -105.0, date, "sport", "unknown");
        let alpine_accident = accident(Uuid::new_v4(), 40.045, -105.0, date, "alpine", "unknown");

        let sport_pred = score_candidates(&r, date, &[sport_accident], &HashMap::new(), None, None, Utc::now(), &cfg);
        let alpine_pred = score_candidates(&r, date, &[alpine_accident], &HashMap::new(), None, None, Utc::now(), &cfg);

        // W(alpine, sport) = 0.9, W(alpine, alpine) = 1.0 -> sport contributes >= 0.85x.
        assert!(sport_pred.risk_score >= 0.85 * alpine_pred.risk_score);
    }

    #[tokio::test]
    async fn score_route_returns_zero_on_no_candidates() {
        use crate::store::fakes::{FakeLocationStatsCache, FakeSpatialStore, FakeWeatherProvider};

        let cfg = ScoringConfig::from_env();
        let store = FakeSpatialStore::default();
        let weather = FakeWeatherProvider::default();
        let stats_cache = FakeLocationStatsCache::default();
        let r = route(Uuid::new_v4(), 28.5, -81.4, RouteType::Sport, None);

        let prediction = score_route(
            &store,
            &weather,
            &stats_cache,
            &r,
            NaiveDate::from_ymd_opt(2026, 7, 15).unwrap(),
            &cfg,
        )
        .await
        .unwrap();

        assert_eq!(prediction.risk_score, 0.0);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[tokio::test]
    async fn fetch_or_build_stats_caches_unavailable_sentinel_on_archive_failure() {
        use crate::store::fakes::FakeLocationStatsCache;
        use crate::store::fakes::FakeWeatherProvider;

        let cfg = ScoringConfig::from_env();
        let weather = FakeWeatherProvider { forecast: None, archive: None };
        let stats_cache = FakeLocationStatsCache::default();
        let coord = Coord::new(40.0, -105.0);
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();

        let stats = fetch_or_build_stats(&weather, &stats_cache, coord, None, date, &cfg).await;
        assert!(stats.is_none());

        let key = weather_stats::cache_key(coord, None, date);
        assert!(stats_cache.is_unavailable(key).await.unwrap());
    }

    #[tokio::test]
    async fn fetch_or_build_stats_uses_cached_stats_without_refetching() {
        use crate::store::fakes::FakeLocationStatsCache;
        use crate::store::fakes::FakeWeatherProvider;

        let cfg = ScoringConfig::from_env();
        let samples: Vec<crate::db::models::DailySample> = (0..365 * 5)
            .map(|_| crate::db::models::DailySample {
                temperature_mean_c: 10.0,
                temperature_min_c: 5.0,
                temperature_max_c: 15.0,
                precipitation_total_mm: 1.0,
                wind_speed_mean_ms: 3.0,
                visibility_mean_km: 15.0,
                cloud_cover_mean_pct: 40.0,
            })
            .collect();
        let weather = FakeWeatherProvider { forecast: None, archive: Some(samples) };
        let stats_cache = FakeLocationStatsCache::default();
        let coord = Coord::new(40.0, -105.0);
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();

        let first = fetch_or_build_stats(&weather, &stats_cache, coord, None, date, &cfg).await;
        assert!(first.is_some());

        let key = weather_stats::cache_key(coord, None, date);
        assert!(!stats_cache.is_unavailable(key).await.unwrap());
        assert!(stats_cache.get(key).await.unwrap().is_some());
    }
}
