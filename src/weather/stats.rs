//! LocationStats builder (C4): turns raw archive daily samples into the
//! weighted per-location, per-season climate baseline used by the weather
//! kernel's extreme-penalty step (§4.4.5 Step E) and cached in
//! `location_stats_cache`.

use chrono::{Datelike, NaiveDate};

use crate::config::ScoringConfig;
use crate::db::models::{DailySample, LocationStats};
use crate::db::queries::LocationStatsKey;
use crate::geo::{self, Coord};

/// Coordinate rounding grid for the cache key (~1.1km at the equator).
const LAT_LON_ROUND_DP: f64 = 100.0;

/// Elevation quantization band width, metres.
const ELEVATION_BAND_WIDTH_M: f64 = 500.0;

/// Short TTL (minutes) for the "provider unavailable" sentinel (§4.3 step 5),
/// so a transient archive outage doesn't force every lookup in that window
/// to re-attempt a fetch that just failed, while still recovering quickly
/// once the provider comes back.
pub const UNAVAILABLE_SENTINEL_TTL_MINUTES: i64 = 10;

pub fn cache_key(coord: Coord, elevation_m: Option<f64>, reference_date: NaiveDate) -> LocationStatsKey {
    LocationStatsKey {
        lat_round: (coord.lat * LAT_LON_ROUND_DP).round() / LAT_LON_ROUND_DP,
        lon_round: (coord.lon * LAT_LON_ROUND_DP).round() / LAT_LON_ROUND_DP,
        elevation_band: elevation_band(elevation_m),
        reference_month: reference_date.month() as i32,
    }
}

fn elevation_band(elevation_m: Option<f64>) -> i32 {
    let e = elevation_m.unwrap_or(0.0);
    (e / ELEVATION_BAND_WIDTH_M).floor() as i32
}

/// Build a `LocationStats` bundle from raw daily archive samples, weighting
/// each sample by its cyclical distance (in months) from `reference_month`
/// so that a July query favours July/August/June samples over January ones.
///
/// Returns `None` when `samples` is empty — the caller treats this the same
/// way as a provider failure (use the neutral default, cache a short-lived
/// unavailable sentinel).
pub fn build(samples: &[(NaiveDate, DailySample)], reference_month: u32, cfg: &ScoringConfig) -> Option<LocationStats> {
    if samples.is_empty() {
        return None;
    }

    let weights: Vec<f64> = samples
        .iter()
        .map(|(date, _)| {
            let d = geo::cyclical_month_distance(date.month(), reference_month);
            cfg.month_decay_base.powi(d as i32)
        })
        .collect();

    let temps: Vec<f64> = samples.iter().map(|(_, s)| s.temperature_mean_c).collect();
    let precip: Vec<f64> = samples.iter().map(|(_, s)| s.precipitation_total_mm).collect();
    let wind: Vec<f64> = samples.iter().map(|(_, s)| s.wind_speed_mean_ms).collect();
    let visibility: Vec<f64> = samples.iter().map(|(_, s)| s.visibility_mean_km).collect();

    let (temperature_mean, temperature_std) = geo::weighted_mean_std(&temps, &weights, 0.5);
    let (precipitation_mean, precipitation_std) = geo::weighted_mean_std(&precip, &weights, 0.5);
    let (wind_mean, wind_std) = geo::weighted_mean_std(&wind, &weights, 0.5);
    let (visibility_mean, visibility_std) = geo::weighted_mean_std(&visibility, &weights, 0.5);

    Some(LocationStats {
        temperature_mean,
        temperature_std,
        precipitation_mean,
        precipitation_std,
        wind_mean,
        wind_std,
        visibility_mean,
        visibility_std,
    })
}
