//! Precomputation scheduler (C9): nightly fan-out over every active route
//! for a small rolling window of dates, batched, coordinate-bucketed, and
//! concurrency-bounded, following the same "compute next wakeup, sleep,
//! loop" structure as the teacher's `run_poller` — just gated on a fixed
//! daily wakeup time instead of an `Expires` header.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::db::models::Route;
use crate::scorer;
use crate::store::{LocationStatsCache, ResultCache, SpatialStore, WeatherProvider};

/// Observable scheduler state, mirroring the teacher's `PollerState` /
/// `/api/v1/poller/status` pattern, exposed at
/// `/api/v1/risk/scheduler/status`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub active: bool,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_run_routes_scored: u64,
    pub last_run_routes_failed: u64,
    pub total_runs: u64,
}

impl SchedulerStatus {
    pub fn new() -> Self {
        Self {
            active: true,
            next_wakeup_at: None,
            last_run_started_at: None,
            last_run_completed_at: None,
            last_run_routes_scored: 0,
            last_run_routes_failed: 0,
            total_runs: 0,
        }
    }
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSchedulerStatus = Arc<RwLock<SchedulerStatus>>;

/// One bucket's shared forecast/LocationStats prefetch (§4.7 step 3),
/// handed to every route scored within that bucket.
type BucketContext = (
    Option<crate::db::models::WeatherForecastWindow>,
    Option<crate::db::models::LocationStats>,
);

/// Coarse bucket key used to group routes that share a forecast window and
/// LocationStats lookup (§4.7 step 2): rounded to ~1km precision.
fn bucket_key(route: &Route) -> (i64, i64) {
    const ROUND_DP: f64 = 100.0;
    (
        (route.latitude * ROUND_DP).round() as i64,
        (route.longitude * ROUND_DP).round() as i64,
    )
}

/// Default planning dates for a nightly run: today, tomorrow, day-after
/// (§4.7 "default (today, tomorrow, day-after)").
pub fn default_dates(today: NaiveDate) -> Vec<NaiveDate> {
    vec![today, today + chrono::Duration::days(1), today + chrono::Duration::days(2)]
}

/// §4.7: enumerate every route in pages of `cfg.scheduler_batch_size`,
/// bucket by coordinate, prefetch forecast/stats once per bucket, then
/// score every route in the bucket (re-using the prefetch), bounded to
/// `cfg.scheduler_max_concurrency` in-flight scoring tasks. Idempotent:
/// re-running the same date overwrites existing cache keys (upsert).
pub async fn compute_daily<S, W, L, C>(
    store: &S,
    weather: &W,
    stats_cache: &L,
    result_cache: &C,
    dates: &[NaiveDate],
    cfg: &ScoringConfig,
) -> (u64, u64)
where
    S: SpatialStore,
    W: WeatherProvider,
    L: LocationStatsCache,
    C: ResultCache,
{
    let semaphore = Arc::new(Semaphore::new(cfg.scheduler_max_concurrency));
    let mut scored_count: u64 = 0;
    let mut failed_count: u64 = 0;
    let mut after: Option<Uuid> = None;

    loop {
        let routes = match store.routes_bulk(after, cfg.scheduler_batch_size).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("scheduler: routes_bulk failed, stopping this run: {}", e);
                break;
            }
        };
        if routes.is_empty() {
            break;
        }
        after = routes.last().map(|r| r.id);

        // Bucket the batch by coarse coordinate (§4.7 step 2) so routes in
        // the same bucket share a single forecast/stats prefetch.
        let mut buckets: HashMap<(i64, i64), Vec<Route>> = HashMap::new();
        for route in routes {
            buckets.entry(bucket_key(&route)).or_default().push(route);
        }

        for date in dates {
            // §4.7 step 3: prefetch one forecast + LocationStats per bucket,
            // then every route in the bucket reuses it instead of refetching.
            let mut work: Vec<(Route, NaiveDate, Arc<BucketContext>)> = Vec::new();
            for bucket_routes in buckets.values() {
                let Some(representative) = bucket_routes.first() else { continue };
                let prefetched: Arc<BucketContext> = Arc::new(
                    scorer::prefetch_bucket_context(weather, stats_cache, representative, *date, cfg).await,
                );
                work.extend(bucket_routes.iter().map(|r| (*r, *date, Arc::clone(&prefetched))));
            }

            let results: Vec<Result<crate::db::models::RiskPrediction, ()>> = stream::iter(work.into_iter().map(
                |(route, date, prefetched)| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire().await.expect("semaphore closed");
                        let (forecast, stats) = (prefetched.0.as_ref(), prefetched.1.as_ref());
                        scorer::score_route_with_prefetch(store, weather, stats_cache, &route, date, forecast, stats, cfg)
                            .await
                            .map_err(|e| {
                                tracing::error!(
                                    "scheduler: scoring route {} for {} failed: {}",
                                    route.id,
                                    date,
                                    e
                                );
                            })
                    }
                },
            ))
            .buffer_unordered(cfg.scheduler_max_concurrency)
            .collect()
            .await;

            let predictions: Vec<crate::db::models::RiskPrediction> = results
                .into_iter()
                .filter_map(|r| match r {
                    Ok(p) => {
                        scored_count += 1;
                        Some(p)
                    }
                    Err(()) => {
                        failed_count += 1;
                        None
                    }
                })
                .collect();

            if let Err(e) = result_cache
                .set_many(&predictions, cfg.result_cache_bulk_ttl_days)
                .await
            {
                tracing::error!("scheduler: bulk cache write failed for {}: {}", date, e);
            }
        }

        if scored_count > 0 && scored_count % 1000 == 0 {
            tracing::info!("scheduler: {} routes scored so far", scored_count);
        }
    }

    (scored_count, failed_count)
}

/// §4.7: once-per-day wakeup at a fixed UTC hour. Runs forever; callers
/// `tokio::spawn` this alongside the HTTP server, exactly as the teacher
/// spawns `run_poller`.
pub async fn run_scheduler<S, W, L, C>(
    store: Arc<S>,
    weather: Arc<W>,
    stats_cache: Arc<L>,
    result_cache: Arc<C>,
    cfg: Arc<ScoringConfig>,
    status: SharedSchedulerStatus,
) where
    S: SpatialStore,
    W: WeatherProvider,
    L: LocationStatsCache,
    C: ResultCache,
{
    tracing::info!("Precomputation scheduler started");
    loop {
        let wakeup_at = next_wakeup(Utc::now(), cfg.scheduler_wakeup_hour_utc);
        {
            let mut s = status.write().await;
            s.next_wakeup_at = Some(wakeup_at);
        }

        let sleep_for = (wakeup_at - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(60));
        tokio::time::sleep(sleep_for).await;

        let started_at = Utc::now();
        let dates = default_dates(started_at.date_naive());
        tracing::info!("scheduler: nightly run starting for dates {:?}", dates);

        let (scored, failed) =
            compute_daily(store.as_ref(), weather.as_ref(), stats_cache.as_ref(), result_cache.as_ref(), &dates, &cfg).await;

        let completed_at = Utc::now();
        tracing::info!(
            "scheduler: nightly run complete, scored={} failed={} duration_ms={}",
            scored,
            failed,
            (completed_at - started_at).num_milliseconds()
        );

        let mut s = status.write().await;
        s.last_run_started_at = Some(started_at);
        s.last_run_completed_at = Some(completed_at);
        s.last_run_routes_scored = scored;
        s.last_run_routes_failed = failed;
        s.total_runs += 1;
    }
}

/// Next occurrence (today or tomorrow) of `hour_utc:00:00`, strictly after `now`.
fn next_wakeup(now: DateTime<Utc>, hour_utc: u32) -> DateTime<Utc> {
    let today_wakeup = now
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(hour_utc, 0, 0).unwrap_or_default())
        .and_utc();
    if today_wakeup > now {
        today_wakeup
    } else {
        today_wakeup + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RouteType;

    #[test]
    fn next_wakeup_today_when_before_hour() {
        let now = "2026-07-15T01:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let wakeup = next_wakeup(now, 2);
        assert_eq!(wakeup, "2026-07-15T02:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn next_wakeup_tomorrow_when_after_hour() {
        let now = "2026-07-15T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let wakeup = next_wakeup(now, 2);
        assert_eq!(wakeup, "2026-07-16T02:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn default_dates_is_today_tomorrow_day_after() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let dates = default_dates(today);
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], today);
        assert_eq!(dates[2], today + chrono::Duration::days(2));
    }

    #[test]
    fn bucket_key_groups_nearby_routes() {
        let r1 = Route {
            id: Uuid::new_v4(),
            latitude: 46.5123,
            longitude: 7.9876,
            elevation_m: None,
            route_type: RouteType::Alpine,
        };
        let mut r2 = r1;
        r2.latitude += 0.0001; // well within 1km rounding
        assert_eq!(bucket_key(&r1), bucket_key(&r2));
    }

    #[tokio::test]
    async fn compute_daily_resumes_and_writes_cache() {
        use crate::store::fakes::{FakeLocationStatsCache, FakeResultCache, FakeSpatialStore, FakeWeatherProvider};

        let cfg = ScoringConfig::from_env();
        let routes: Vec<Route> = (0..5)
            .map(|i| Route {
                id: Uuid::new_v4(),
                latitude: 40.0 + i as f64 * 0.01,
                longitude: -105.0,
                elevation_m: None,
                route_type: RouteType::Sport,
            })
            .collect();
        let store = FakeSpatialStore {
            routes: routes.clone(),
            ..Default::default()
        };
        let weather = FakeWeatherProvider::default();
        let stats_cache = FakeLocationStatsCache::default();
        let result_cache = FakeResultCache::default();

        let dates = vec![NaiveDate::from_ymd_opt(2026, 7, 15).unwrap()];
        let (scored, failed) =
            compute_daily(&store, &weather, &stats_cache, &result_cache, &dates, &cfg).await;

        assert_eq!(scored, 5);
        assert_eq!(failed, 0);
        assert_eq!(result_cache.entries.lock().unwrap().len(), 5);
    }
}
