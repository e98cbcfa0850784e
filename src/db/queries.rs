//! Postgres-backed adapters for the spatial/weather store (C2) and the two
//! cache tables (C4 LocationStats, C8 result cache).
//!
//! Follows the teacher's query idiom throughout: bare `sqlx::query[_as]`
//! (no query-macro compile-time checking), explicit column lists kept in
//! sync with the model structs via comments, `ON CONFLICT ... DO UPDATE`
//! upserts for cache writes, and `UNNEST(...) WITH ORDINALITY` +
//! `LEFT JOIN LATERAL` for order-preserving bulk lookups.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Accident, AccidentWeatherWindow, DailySample, LocationStats, Route, RouteRow, RouteType};
use crate::helpers::{dec_to_f64, opt_dec_to_f64};

// ---------------------------------------------------------------------------
// C2: spatial store adapter
// ---------------------------------------------------------------------------

/// Bounding-box half-width in degrees latitude per km, used to prefilter
/// candidate rows before the exact haversine recheck in the caller. One
/// degree of latitude is ~111km everywhere; longitude is corrected by
/// `cos(lat)` at the call site since that needs the query center.
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// Accidents within `radius_km` of `center`, optionally since a given date.
/// Uses a bounding-box prefilter (cheap, index-friendly) and leaves the
/// exact haversine distance check to the caller (C2 contract: callers
/// recheck the exact radius, since this SQL box is a superset).
pub(crate) async fn accidents_within(
    pool: &PgPool,
    center_lat: f64,
    center_lon: f64,
    radius_km: f64,
    since: Option<NaiveDate>,
) -> Result<Vec<Accident>, sqlx::Error> {
    let lat_delta = radius_km / KM_PER_DEGREE_LAT;
    // Guard against the pole-adjacent cos(lat) -> 0 blowup; cap the box at
    // the full longitude range rather than dividing by a near-zero cosine.
    let lon_delta = if center_lat.abs() >= 89.0 {
        180.0
    } else {
        radius_km / (KM_PER_DEGREE_LAT * center_lat.to_radians().cos().abs())
    };

    sqlx::query_as::<_, Accident>(
        "SELECT id, occurred_on, latitude, longitude, elevation_m, activity, severity
         FROM accidents
         WHERE latitude BETWEEN $1 - $3 AND $1 + $3
           AND longitude BETWEEN $2 - $4 AND $2 + $4
           AND latitude IS NOT NULL
           AND longitude IS NOT NULL
           AND occurred_on IS NOT NULL
           AND ($5::date IS NULL OR occurred_on >= $5)
         ORDER BY occurred_on DESC",
    )
    .bind(center_lat)
    .bind(center_lon)
    .bind(lat_delta)
    .bind(lon_delta)
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Internal helper row for the bulk weather-window query — `idx`/`day_offset`
/// columns preserve (accident, day) ordering across the `UNNEST ... WITH
/// ORDINALITY` join.
#[derive(Debug, sqlx::FromRow)]
struct WeatherWindowRow {
    idx: i64,
    day_offset: Option<i32>,
    temperature_mean_c: Option<Decimal>,
    temperature_min_c: Option<Decimal>,
    temperature_max_c: Option<Decimal>,
    precipitation_total_mm: Option<Decimal>,
    wind_speed_mean_ms: Option<Decimal>,
    visibility_mean_km: Option<Decimal>,
    cloud_cover_mean_pct: Option<Decimal>,
}

/// Bulk fetch of the 7-day (days -6..=0) weather window for each accident
/// id, in the same input order. Missing days are simply absent from
/// `AccidentWeatherWindow.days` rather than padded — callers check
/// `is_usable()` before using a window.
pub(crate) async fn weather_windows_for(
    pool: &PgPool,
    accident_ids: &[Uuid],
) -> Result<Vec<AccidentWeatherWindow>, sqlx::Error> {
    if accident_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<WeatherWindowRow> = sqlx::query_as(
        "SELECT
            p.idx,
            w.day_offset,
            w.temperature_mean_c, w.temperature_min_c, w.temperature_max_c,
            w.precipitation_total_mm, w.wind_speed_mean_ms,
            w.visibility_mean_km, w.cloud_cover_mean_pct
         FROM UNNEST($1::uuid[]) WITH ORDINALITY AS p(accident_id, idx)
         LEFT JOIN weather_windows w
           ON w.accident_id = p.accident_id
          AND w.day_offset BETWEEN -6 AND 0
         ORDER BY p.idx, w.day_offset",
    )
    .bind(accident_ids)
    .fetch_all(pool)
    .await?;

    let mut windows = vec![AccidentWeatherWindow::default(); accident_ids.len()];
    for row in rows {
        let idx = (row.idx - 1) as usize;
        let Some(_) = row.day_offset else { continue };
        if idx >= windows.len() {
            tracing::warn!(
                "weather_windows_for: ORDINALITY index {} out of bounds (len={}), skipping",
                row.idx,
                accident_ids.len(),
            );
            continue;
        }
        windows[idx].days.push(DailySample {
            temperature_mean_c: dec_to_f64(row.temperature_mean_c.unwrap_or_default()),
            temperature_min_c: dec_to_f64(row.temperature_min_c.unwrap_or_default()),
            temperature_max_c: dec_to_f64(row.temperature_max_c.unwrap_or_default()),
            precipitation_total_mm: dec_to_f64(row.precipitation_total_mm.unwrap_or_default()),
            wind_speed_mean_ms: dec_to_f64(row.wind_speed_mean_ms.unwrap_or_default()),
            visibility_mean_km: dec_to_f64(row.visibility_mean_km.unwrap_or_default()),
            cloud_cover_mean_pct: dec_to_f64(row.cloud_cover_mean_pct.unwrap_or_default()),
        });
    }
    Ok(windows)
}

fn row_to_route(row: RouteRow) -> Route {
    Route {
        id: row.id,
        latitude: dec_to_f64(row.latitude),
        longitude: dec_to_f64(row.longitude),
        elevation_m: opt_dec_to_f64(row.elevation_m),
        route_type: RouteType::parse(&row.route_type),
    }
}

/// Get a single route by id.
pub(crate) async fn get_route(pool: &PgPool, route_id: Uuid) -> Result<Option<Route>, sqlx::Error> {
    let row = sqlx::query_as::<_, RouteRow>(
        "SELECT id, latitude, longitude, elevation_m, route_type, area_id
         FROM routes WHERE id = $1",
    )
    .bind(route_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_route))
}

/// Stream all routes in pages of `page_size`, ordered by id, for the
/// nightly scheduler (C9). Resumable: callers pass the last-seen id as
/// `after` to continue a previous run.
pub(crate) async fn routes_bulk(
    pool: &PgPool,
    after: Option<Uuid>,
    page_size: i64,
) -> Result<Vec<Route>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RouteRow>(
        "SELECT id, latitude, longitude, elevation_m, route_type, area_id
         FROM routes
         WHERE ($1::uuid IS NULL OR id > $1)
         ORDER BY id
         LIMIT $2",
    )
    .bind(after)
    .bind(page_size)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_route).collect())
}

// ---------------------------------------------------------------------------
// C4: LocationStats cache
// ---------------------------------------------------------------------------

/// Composite key identifying a cached `LocationStats` bundle: rounded
/// coordinate, quantized elevation band, and reference month (season is
/// derivable from the month, kept out of the key).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocationStatsKey {
    pub(crate) lat_round: f64,
    pub(crate) lon_round: f64,
    pub(crate) elevation_band: i32,
    pub(crate) reference_month: i32,
}

#[derive(sqlx::FromRow)]
struct LocationStatsRow {
    temperature_mean: f64,
    temperature_std: f64,
    precipitation_mean: f64,
    precipitation_std: f64,
    wind_mean: f64,
    wind_std: f64,
    visibility_mean: f64,
    visibility_std: f64,
}

impl From<LocationStatsRow> for LocationStats {
    fn from(r: LocationStatsRow) -> Self {
        LocationStats {
            temperature_mean: r.temperature_mean,
            temperature_std: r.temperature_std,
            precipitation_mean: r.precipitation_mean,
            precipitation_std: r.precipitation_std,
            wind_mean: r.wind_mean,
            wind_std: r.wind_std,
            visibility_mean: r.visibility_mean,
            visibility_std: r.visibility_std,
        }
    }
}

/// Fetch a cached `LocationStats` bundle, if present and unexpired.
pub(crate) async fn get_location_stats(
    pool: &PgPool,
    key: LocationStatsKey,
) -> Result<Option<LocationStats>, sqlx::Error> {
    let row = sqlx::query_as::<_, LocationStatsRow>(
        "SELECT temperature_mean, temperature_std, precipitation_mean, precipitation_std,
                wind_mean, wind_std, visibility_mean, visibility_std
         FROM location_stats_cache
         WHERE lat_round = $1 AND lon_round = $2 AND elevation_band = $3
           AND reference_month = $4 AND expires_at > NOW()",
    )
    .bind(key.lat_round)
    .bind(key.lon_round)
    .bind(key.elevation_band)
    .bind(key.reference_month)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(LocationStats::from))
}

/// Upsert a `LocationStats` bundle with a TTL. Also supports writing a
/// short-lived "unavailable" sentinel (all fields zeroed, short TTL) when
/// the upstream weather provider failed — the caller decides the TTL.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn set_location_stats(
    pool: &PgPool,
    key: LocationStatsKey,
    stats: &LocationStats,
    ttl_hours: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO location_stats_cache
            (lat_round, lon_round, elevation_band, reference_month,
             temperature_mean, temperature_std, precipitation_mean, precipitation_std,
             wind_mean, wind_std, visibility_mean, visibility_std, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW() + $13 * INTERVAL '1 hour')
         ON CONFLICT (lat_round, lon_round, elevation_band, reference_month) DO UPDATE SET
             temperature_mean = EXCLUDED.temperature_mean,
             temperature_std = EXCLUDED.temperature_std,
             precipitation_mean = EXCLUDED.precipitation_mean,
             precipitation_std = EXCLUDED.precipitation_std,
             wind_mean = EXCLUDED.wind_mean,
             wind_std = EXCLUDED.wind_std,
             visibility_mean = EXCLUDED.visibility_mean,
             visibility_std = EXCLUDED.visibility_std,
             expires_at = EXCLUDED.expires_at",
    )
    .bind(key.lat_round)
    .bind(key.lon_round)
    .bind(key.elevation_band)
    .bind(key.reference_month)
    .bind(stats.temperature_mean)
    .bind(stats.temperature_std)
    .bind(stats.precipitation_mean)
    .bind(stats.precipitation_std)
    .bind(stats.wind_mean)
    .bind(stats.wind_std)
    .bind(stats.visibility_mean)
    .bind(stats.visibility_std)
    .bind(ttl_hours as f64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Check whether `key` is currently marked "unavailable" (a recent archive
/// fetch failed for it). Kept as a separate table from the stats cache
/// itself so a real `LocationStats` row and its negative-cache sentinel are
/// never confused for one another.
pub(crate) async fn is_location_stats_unavailable(
    pool: &PgPool,
    key: LocationStatsKey,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM location_stats_unavailable
         WHERE lat_round = $1 AND lon_round = $2 AND elevation_band = $3
           AND reference_month = $4 AND expires_at > NOW()",
    )
    .bind(key.lat_round)
    .bind(key.lon_round)
    .bind(key.elevation_band)
    .bind(key.reference_month)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Mark `key` as "unavailable" for `ttl_minutes` (§4.3 step 5: ~10 minutes),
/// so concurrent/subsequent callers skip the archive provider instead of
/// re-attempting a fetch that just failed.
pub(crate) async fn set_location_stats_unavailable(
    pool: &PgPool,
    key: LocationStatsKey,
    ttl_minutes: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO location_stats_unavailable
            (lat_round, lon_round, elevation_band, reference_month, expires_at)
         VALUES ($1, $2, $3, $4, NOW() + $5 * INTERVAL '1 minute')
         ON CONFLICT (lat_round, lon_round, elevation_band, reference_month) DO UPDATE SET
             expires_at = EXCLUDED.expires_at",
    )
    .bind(key.lat_round)
    .bind(key.lon_round)
    .bind(key.elevation_band)
    .bind(key.reference_month)
    .bind(ttl_minutes)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// C8: result cache
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RiskCacheRow {
    route_id: Uuid,
    date: NaiveDate,
    risk_score: f64,
    confidence: f64,
    contributions: serde_json::Value,
    computed_at: DateTime<Utc>,
}

fn row_to_prediction(row: RiskCacheRow) -> crate::db::models::RiskPrediction {
    let contributions = serde_json::from_value(row.contributions).unwrap_or_default();
    crate::db::models::RiskPrediction {
        route_id: row.route_id,
        date: row.date,
        risk_score: row.risk_score,
        confidence: row.confidence,
        contributions,
        computed_at: row.computed_at,
    }
}

/// Fetch a single cached prediction, if present and unexpired.
pub(crate) async fn get_one(
    pool: &PgPool,
    route_id: Uuid,
    date: NaiveDate,
) -> Result<Option<crate::db::models::RiskPrediction>, sqlx::Error> {
    let row = sqlx::query_as::<_, RiskCacheRow>(
        "SELECT route_id, date, risk_score, confidence, contributions, computed_at
         FROM risk_cache
         WHERE route_id = $1 AND date = $2 AND expires_at > NOW()",
    )
    .bind(route_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_prediction))
}

/// Bulk fetch of cached predictions for (route_id, date) pairs, in input
/// order. Entries with no unexpired cache row are `None` — `map_bulk`
/// (C10) never computes on a miss here, it only reports them absent.
pub(crate) async fn get_many(
    pool: &PgPool,
    pairs: &[(Uuid, NaiveDate)],
) -> Result<Vec<Option<crate::db::models::RiskPrediction>>, sqlx::Error> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let route_ids: Vec<Uuid> = pairs.iter().map(|(id, _)| *id).collect();
    let dates: Vec<NaiveDate> = pairs.iter().map(|(_, d)| *d).collect();

    #[derive(sqlx::FromRow)]
    struct RiskCacheRowWithIdx {
        idx: i64,
        route_id: Option<Uuid>,
        date: Option<NaiveDate>,
        risk_score: Option<f64>,
        confidence: Option<f64>,
        contributions: Option<serde_json::Value>,
        computed_at: Option<DateTime<Utc>>,
    }

    let rows: Vec<RiskCacheRowWithIdx> = sqlx::query_as(
        "SELECT
            p.idx,
            r.route_id, r.date, r.risk_score, r.confidence, r.contributions, r.computed_at
         FROM UNNEST($1::uuid[], $2::date[]) WITH ORDINALITY AS p(route_id, date, idx)
         LEFT JOIN LATERAL (
             SELECT *
             FROM risk_cache
             WHERE route_id = p.route_id AND date = p.date AND expires_at > NOW()
             LIMIT 1
         ) r ON true",
    )
    .bind(&route_ids)
    .bind(&dates)
    .fetch_all(pool)
    .await?;

    let mut results = vec![None; pairs.len()];
    for row in rows {
        let idx = (row.idx - 1) as usize;
        if idx >= results.len() {
            continue;
        }
        if let (Some(route_id), Some(date), Some(risk_score), Some(confidence), Some(contributions), Some(computed_at)) = (
            row.route_id,
            row.date,
            row.risk_score,
            row.confidence,
            row.contributions,
            row.computed_at,
        ) {
            results[idx] = Some(row_to_prediction(RiskCacheRow {
                route_id,
                date,
                risk_score,
                confidence,
                contributions,
                computed_at,
            }));
        }
    }
    Ok(results)
}

/// Append a row to the optional `risk_history` trend table (§6). Best
/// effort: a failure here must never fail the cache write it rides along
/// with, since the table is explicitly optional persisted state.
async fn append_risk_history(
    pool: &PgPool,
    prediction: &crate::db::models::RiskPrediction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO risk_history (route_id, date, risk_score, confidence, computed_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(prediction.route_id)
    .bind(prediction.date)
    .bind(prediction.risk_score)
    .bind(prediction.confidence)
    .bind(prediction.computed_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert a single prediction with a TTL (hours), and append a trend-history
/// row alongside it.
pub(crate) async fn set_one(
    pool: &PgPool,
    prediction: &crate::db::models::RiskPrediction,
    ttl_hours: i64,
) -> Result<(), sqlx::Error> {
    let contributions = serde_json::to_value(&prediction.contributions).unwrap_or_default();
    sqlx::query(
        "INSERT INTO risk_cache (route_id, date, risk_score, confidence, contributions, computed_at, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW() + $7 * INTERVAL '1 hour')
         ON CONFLICT (route_id, date) DO UPDATE SET
             risk_score = EXCLUDED.risk_score,
             confidence = EXCLUDED.confidence,
             contributions = EXCLUDED.contributions,
             computed_at = EXCLUDED.computed_at,
             expires_at = EXCLUDED.expires_at",
    )
    .bind(prediction.route_id)
    .bind(prediction.date)
    .bind(prediction.risk_score)
    .bind(prediction.confidence)
    .bind(contributions)
    .bind(prediction.computed_at)
    .bind(ttl_hours as f64)
    .execute(pool)
    .await?;

    if let Err(e) = append_risk_history(pool, prediction).await {
        tracing::warn!("set_one: failed to append risk_history row: {}", e);
    }
    Ok(())
}

/// Bulk upsert, used by the nightly scheduler (C9) to write a batch of
/// predictions. Per §9's design note ("prefer many small writes over a
/// single transactional write"), each prediction is its own independent
/// upsert rather than one batch wrapped in a transaction — cache entries
/// are idempotent, so a failure partway through still leaves the earlier
/// writes in place instead of rolling everything back.
pub(crate) async fn set_many(
    pool: &PgPool,
    predictions: &[crate::db::models::RiskPrediction],
    ttl_days: i64,
) -> Result<(), sqlx::Error> {
    for prediction in predictions {
        let contributions = serde_json::to_value(&prediction.contributions).unwrap_or_default();
        sqlx::query(
            "INSERT INTO risk_cache (route_id, date, risk_score, confidence, contributions, computed_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW() + $7 * INTERVAL '1 day')
             ON CONFLICT (route_id, date) DO UPDATE SET
                 risk_score = EXCLUDED.risk_score,
                 confidence = EXCLUDED.confidence,
                 contributions = EXCLUDED.contributions,
                 computed_at = EXCLUDED.computed_at,
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(prediction.route_id)
        .bind(prediction.date)
        .bind(prediction.risk_score)
        .bind(prediction.confidence)
        .bind(contributions)
        .bind(prediction.computed_at)
        .bind(ttl_days as f64)
        .execute(pool)
        .await?;

        if let Err(e) = append_risk_history(pool, prediction).await {
            tracing::warn!("set_many: failed to append risk_history row: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn km_per_degree_lat_is_positive() {
        assert!(KM_PER_DEGREE_LAT > 0.0);
    }
}
