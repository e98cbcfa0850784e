//! Geometric and statistical primitives shared by the weight kernels (C1).
//!
//! Pure functions only — no I/O, no allocation beyond what the caller passes
//! in. Kept dependency-free so the scorer's hot path never suspends.

use chrono::{Datelike, NaiveDate};

/// Mean radius of the earth in kilometres, used for haversine distance.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle distance between two coordinates, in kilometres.
pub fn haversine_km(a: Coord, b: Coord) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Initial compass bearing from `a` to `b`, in degrees [0, 360).
pub fn bearing_deg(a: Coord, b: Coord) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Circular standard deviation of a set of bearings (degrees), used by the
/// confidence model's spatial-coverage indicator. Returns 0.0 for 0 or 1
/// samples.
pub fn bearing_std_deg(bearings: &[f64]) -> f64 {
    if bearings.len() < 2 {
        return 0.0;
    }
    let n = bearings.len() as f64;
    let (sum_sin, sum_cos) = bearings.iter().fold((0.0, 0.0), |(s, c), &b| {
        let r = b.to_radians();
        (s + r.sin(), c + r.cos())
    });
    let mean_sin = sum_sin / n;
    let mean_cos = sum_cos / n;
    let r = (mean_sin.powi(2) + mean_cos.powi(2)).sqrt().min(1.0);
    // Circular standard deviation in radians, converted to degrees.
    (-2.0 * r.ln()).max(0.0).sqrt().to_degrees()
}

/// Population mean and standard deviation of a slice, with a std floor.
pub fn mean_std(values: &[f64], std_floor: f64) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, std_floor);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt().max(std_floor))
}

/// Weighted mean and weighted standard deviation. `weights` need not sum to 1.
pub fn weighted_mean_std(values: &[f64], weights: &[f64], std_floor: f64) -> (f64, f64) {
    let wsum: f64 = weights.iter().sum();
    if values.is_empty() || wsum <= 0.0 {
        return (0.0, std_floor);
    }
    let mean = values
        .iter()
        .zip(weights)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / wsum;
    let variance = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum::<f64>()
        / wsum;
    (mean, variance.sqrt().max(std_floor))
}

/// A z-score, i.e. how many standard deviations `value` is from `mean`.
pub fn zscore(value: f64, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    (value - mean) / std
}

/// Weighted Pearson correlation coefficient between `xs` and `ys` using
/// per-sample `weights`. Edge cases per §4.4.6 Step B:
/// - both sequences have zero (weighted) variance ⇒ returns 1.0 (perfect
///   agreement — nothing varies, so nothing disagrees)
/// - exactly one has zero variance ⇒ returns 0.0
pub fn weighted_pearson(xs: &[f64], ys: &[f64], weights: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert_eq!(xs.len(), weights.len());

    let wsum: f64 = weights.iter().sum();
    if xs.is_empty() || wsum <= 0.0 {
        return 1.0;
    }

    let (mean_x, _) = weighted_mean_std(xs, weights, 0.0);
    let (mean_y, _) = weighted_mean_std(ys, weights, 0.0);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for ((x, y), w) in xs.iter().zip(ys).zip(weights) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += w * dx * dy;
        var_x += w * dx * dx;
        var_y += w * dy * dy;
    }

    let x_flat = var_x <= f64::EPSILON;
    let y_flat = var_y <= f64::EPSILON;
    match (x_flat, y_flat) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0),
    }
}

/// Northern-hemisphere meteorological season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// December, January, February
    Winter,
    /// March, April, May
    Spring,
    /// June, July, August
    Summer,
    /// September, October, November
    Autumn,
}

impl Season {
    pub fn of_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3 | 4 | 5 => Season::Spring,
            6 | 7 | 8 => Season::Summer,
            9 | 10 | 11 => Season::Autumn,
            _ => unreachable!("chrono month is always 1..=12"),
        }
    }
}

/// Meteorological season of a date (Northern Hemisphere convention, per spec).
pub fn season_of_date(date: NaiveDate) -> Season {
    Season::of_month(date.month())
}

/// Cyclical distance between two calendar months (1-12), in {0..=6}.
pub fn cyclical_month_distance(m1: u32, m2: u32) -> u32 {
    let diff = (m1 as i32 - m2 as i32).unsigned_abs();
    diff.min(12 - diff)
}
