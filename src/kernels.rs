//! Weight kernels (C5): one pure function per dimension in §4.4. Each
//! kernel is non-negative; most are in [0,1]. All take their constants from
//! `ScoringConfig` rather than hard-coding defaults, so operators can
//! override them without a rebuild.

use chrono::NaiveDate;

use crate::config::ScoringConfig;
use crate::db::models::{DailySample, RouteType, Severity};
use crate::geo::{self, Coord};

/// Spatial Gaussian kernel, §4.4.1. `w_s = exp(-d^2 / (2*b^2))`.
pub fn spatial_weight(route_coord: Coord, accident_coord: Coord, route_type: RouteType, cfg: &ScoringConfig) -> f64 {
    let d = geo::haversine_km(route_coord, accident_coord);
    let b = cfg.spatial_bandwidth_km.get(route_type);
    (-(d * d) / (2.0 * b * b)).exp()
}

/// Damped-exponential + seasonal temporal kernel, §4.4.2.
const IMPACT: f64 = 0.35;
const SHAPE: f64 = 1.5;
const BOOST: f64 = 1.5;
const SEASONAL_IMPACT: f64 = 0.10;

pub fn temporal_weight(
    planning_date: NaiveDate,
    accident_date: NaiveDate,
    route_type: RouteType,
    cfg: &ScoringConfig,
) -> f64 {
    let delta = (planning_date - accident_date).num_days().unsigned_abs() as f64;
    let lambda = cfg.temporal_lambda.get(route_type);
    let base = lambda.powf(delta);
    let w_t_base = 1.0 - IMPACT * (1.0 - base.powf(SHAPE));

    if geo::season_of_date(planning_date) == geo::season_of_date(accident_date) {
        w_t_base * (1.0 + (BOOST - 1.0) * SEASONAL_IMPACT)
    } else {
        w_t_base
    }
}

/// Route-type asymmetric compatibility kernel, §4.4.3.
pub fn route_type_weight(planning_type: RouteType, accident_type: RouteType, cfg: &ScoringConfig) -> f64 {
    cfg.route_type_weight(planning_type, accident_type)
}

/// Severity multiplier, §4.4.4. Multiplicative, not clamped to [0,1].
pub fn severity_weight(severity: Severity, cfg: &ScoringConfig) -> f64 {
    match severity {
        Severity::Fatal => cfg.severity_fatal,
        Severity::Serious => cfg.severity_serious,
        Severity::Minor => cfg.severity_minor,
        Severity::Unknown => cfg.severity_unknown,
    }
}

/// Asymmetric elevation decay kernel, §4.4.5. Neutral (1.0) if either
/// elevation is missing.
pub fn elevation_weight(
    route_elevation_m: Option<f64>,
    accident_elevation_m: Option<f64>,
    route_type: RouteType,
    cfg: &ScoringConfig,
) -> f64 {
    let (Some(route_e), Some(accident_e)) = (route_elevation_m, accident_elevation_m) else {
        return 1.0;
    };
    let delta_e = accident_e - route_e;
    let c = if delta_e > 0.0 {
        cfg.elevation_c_up.get(route_type)
    } else {
        cfg.elevation_c_down.get(route_type)
    };
    (-delta_e.abs() / c).exp()
}

/// Fraction of days in `samples` that are a freeze-thaw day (min <= 0 <= max).
fn freeze_thaw_count(samples: &[DailySample]) -> usize {
    samples
        .iter()
        .filter(|s| s.temperature_min_c <= 0.0 && 0.0 <= s.temperature_max_c)
        .count()
}

/// Weather-similarity kernel, §4.4.6. `forecast` and `accident` are
/// truncated to their common length by the caller (or here, defensively)
/// before being compared. `stats`, if present, drives the extreme-weather
/// penalty (Step E); its absence leaves the penalty at 1.0.
pub fn weather_weight(
    forecast: &[DailySample],
    accident: &[DailySample],
    stats: Option<&crate::db::models::LocationStats>,
    cfg: &ScoringConfig,
) -> f64 {
    let n = forecast.len().min(accident.len());
    if n == 0 {
        return 0.5;
    }
    let forecast = &forecast[forecast.len() - n..];
    let accident = &accident[accident.len() - n..];

    // Step A: per-day within-window weights, day n-1 (most recent) largest.
    let decay = cfg.weather_day_decay;
    let raw_weights: Vec<f64> = (0..n).map(|k| decay.powi((n - 1 - k) as i32)).collect();
    let wsum: f64 = raw_weights.iter().sum();
    let weights: Vec<f64> = raw_weights.iter().map(|w| w / wsum).collect();

    // Step B: weighted Pearson over each variable, mapped to [0,1].
    let temp_f: Vec<f64> = forecast.iter().map(|s| s.temperature_mean_c).collect();
    let temp_a: Vec<f64> = accident.iter().map(|s| s.temperature_mean_c).collect();
    let precip_f: Vec<f64> = forecast.iter().map(|s| s.precipitation_total_mm).collect();
    let precip_a: Vec<f64> = accident.iter().map(|s| s.precipitation_total_mm).collect();
    let wind_f: Vec<f64> = forecast.iter().map(|s| s.wind_speed_mean_ms).collect();
    let wind_a: Vec<f64> = accident.iter().map(|s| s.wind_speed_mean_ms).collect();
    let vis_f: Vec<f64> = forecast.iter().map(|s| s.visibility_mean_km).collect();
    let vis_a: Vec<f64> = accident.iter().map(|s| s.visibility_mean_km).collect();
    let cloud_f: Vec<f64> = forecast.iter().map(|s| s.cloud_cover_mean_pct).collect();
    let cloud_a: Vec<f64> = accident.iter().map(|s| s.cloud_cover_mean_pct).collect();

    let to_similarity = |r: f64| (r + 1.0) / 2.0;
    let s_temp = to_similarity(geo::weighted_pearson(&temp_f, &temp_a, &weights));
    let s_precip = to_similarity(geo::weighted_pearson(&precip_f, &precip_a, &weights));
    let s_wind = to_similarity(geo::weighted_pearson(&wind_f, &wind_a, &weights));
    let s_vis = to_similarity(geo::weighted_pearson(&vis_f, &vis_a, &weights));
    let s_cloud = to_similarity(geo::weighted_pearson(&cloud_f, &cloud_a, &weights));

    // Step C: freeze-thaw alignment.
    let c_f = freeze_thaw_count(forecast) as f64;
    let c_a = freeze_thaw_count(accident) as f64;
    let s_ft = 1.0 - (c_f - c_a).abs() / n as f64;

    // Step D: equal-weighted mean of the six sub-scores.
    let pattern_similarity = (s_temp + s_precip + s_wind + s_vis + s_cloud + s_ft) / 6.0;

    // Step E: extreme-weather penalty, only meaningful with >=3 days and stats.
    let extreme_penalty = if n < 3 {
        1.0
    } else if let Some(stats) = stats {
        forecast
            .iter()
            .map(|day| extreme_penalty_for_day(day, stats))
            .fold(1.0_f64, f64::max)
    } else {
        1.0
    };

    pattern_similarity * extreme_penalty
}

/// Max per-variable extreme-weather penalty for a single forecast day,
/// §4.4.6 Step E.
fn extreme_penalty_for_day(day: &DailySample, stats: &crate::db::models::LocationStats) -> f64 {
    let z_wind = geo::zscore(day.wind_speed_mean_ms, stats.wind_mean, stats.wind_std);
    let z_precip = geo::zscore(
        day.precipitation_total_mm,
        stats.precipitation_mean,
        stats.precipitation_std,
    );
    let z_temp = geo::zscore(
        day.temperature_mean_c,
        stats.temperature_mean,
        stats.temperature_std,
    )
    .abs();
    // Visibility is inverted: low visibility is the hazard, so the z-score
    // is measured as (mean - value)/std rather than (value - mean)/std.
    let z_vis = geo::zscore(stats.visibility_mean, day.visibility_mean_km, stats.visibility_std);

    let penalty = |z: f64, factor: f64| if z > 2.0 { 1.0 + factor * (z - 2.0) } else { 1.0 };

    [
        penalty(z_wind, 0.2),
        penalty(z_precip, 0.2),
        penalty(z_temp, 0.2),
        penalty(z_vis, 0.25),
    ]
    .into_iter()
    .fold(1.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;

    fn sample(t: f64) -> DailySample {
        DailySample {
            temperature_mean_c: t,
            temperature_min_c: t - 5.0,
            temperature_max_c: t + 5.0,
            precipitation_total_mm: 2.0,
            wind_speed_mean_ms: 5.0,
            visibility_mean_km: 20.0,
            cloud_cover_mean_pct: 40.0,
        }
    }

    #[test]
    fn spatial_weight_decreases_with_distance() {
        let cfg = ScoringConfig::from_env();
        let route = Coord::new(46.5, 7.9);
        let near = Coord::new(46.51, 7.9);
        let far = Coord::new(47.5, 8.9);
        let w_near = spatial_weight(route, near, RouteType::Alpine, &cfg);
        let w_far = spatial_weight(route, far, RouteType::Alpine, &cfg);
        assert!(w_near >= w_far);
        assert!((0.0..=1.0).contains(&w_near));
    }

    #[test]
    fn spatial_weight_zero_distance_is_one() {
        let cfg = ScoringConfig::from_env();
        let p = Coord::new(40.0, -105.0);
        assert!((spatial_weight(p, p, RouteType::Sport, &cfg) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn severity_weights_match_spec_values() {
        let cfg = ScoringConfig::from_env();
        assert_eq!(severity_weight(Severity::Fatal, &cfg), 1.3);
        assert_eq!(severity_weight(Severity::Serious, &cfg), 1.1);
        assert_eq!(severity_weight(Severity::Minor, &cfg), 1.0);
        assert_eq!(severity_weight(Severity::Unknown, &cfg), 1.0);
    }

    #[test]
    fn route_type_matrix_canary_asymmetry() {
        let cfg = ScoringConfig::from_env();
        let alpine_sport = route_type_weight(RouteType::Alpine, RouteType::Sport, &cfg);
        let sport_alpine = route_type_weight(RouteType::Sport, RouteType::Alpine, &cfg);
        assert_eq!(alpine_sport, 0.9);
        assert_eq!(sport_alpine, 0.3);
    }

    #[test]
    fn elevation_weight_neutral_when_missing() {
        let cfg = ScoringConfig::from_env();
        assert_eq!(elevation_weight(None, Some(100.0), RouteType::Alpine, &cfg), 1.0);
        assert_eq!(elevation_weight(Some(100.0), None, RouteType::Alpine, &cfg), 1.0);
    }

    #[test]
    fn elevation_weight_decays_asymmetrically() {
        let cfg = ScoringConfig::from_env();
        // accident 500m above route vs 500m below — up/down constants differ (800 vs 1200).
        let above = elevation_weight(Some(2000.0), Some(2500.0), RouteType::Alpine, &cfg);
        let below = elevation_weight(Some(2000.0), Some(1500.0), RouteType::Alpine, &cfg);
        assert!(above < below, "accidents above should decay faster: {above} vs {below}");
    }

    #[test]
    fn weather_weight_identical_windows_is_near_max() {
        let cfg = ScoringConfig::from_env();
        let window: Vec<DailySample> = (0..7).map(|i| sample(i as f64)).collect();
        let w = weather_weight(&window, &window, None, &cfg);
        assert!(w > 0.95, "identical windows should score near 1.0, got {w}");
    }

    #[test]
    fn weather_weight_empty_window_is_neutral() {
        let cfg = ScoringConfig::from_env();
        assert_eq!(weather_weight(&[], &[], None, &cfg), 0.5);
    }

    #[test]
    fn weather_weight_symmetric_under_swap() {
        let cfg = ScoringConfig::from_env();
        let a: Vec<DailySample> = (0..7).map(|i| sample(i as f64 * 2.0)).collect();
        let b: Vec<DailySample> = (0..7).map(|i| sample(20.0 - i as f64)).collect();
        let forward = weather_weight(&a, &b, None, &cfg);
        let backward = weather_weight(&b, &a, None, &cfg);
        assert!((forward - backward).abs() < 1e-9);
    }
}
