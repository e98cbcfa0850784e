use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Route-type tag. Drives spatial bandwidth, temporal decay, elevation
/// decay constants, and the route-type compatibility matrix (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Alpine,
    Trad,
    Sport,
    Ice,
    Mixed,
    Aid,
    Other,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Alpine => "alpine",
            RouteType::Trad => "trad",
            RouteType::Sport => "sport",
            RouteType::Ice => "ice",
            RouteType::Mixed => "mixed",
            RouteType::Aid => "aid",
            RouteType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "alpine" => RouteType::Alpine,
            "trad" => RouteType::Trad,
            "sport" => RouteType::Sport,
            "ice" => RouteType::Ice,
            "mixed" => RouteType::Mixed,
            "aid" => RouteType::Aid,
            _ => RouteType::Other,
        }
    }
}

/// Accident severity. Missing severity is represented as `Unknown`, which
/// carries the same 1.0 multiplier as `Minor` (§4.4.4, §9: this is
/// intentional and must not change without an explicit override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Serious,
    Minor,
    Unknown,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s {
            "fatal" => Severity::Fatal,
            "serious" => Severity::Serious,
            "minor" => Severity::Minor,
            _ => Severity::Unknown,
        }
    }
}

/// An immutable historical climbing accident record.
///
/// Coordinate and date are required for an accident to participate in
/// scoring — rows missing either are filtered out at the query layer
/// (see `queries::accidents_within`).
#[derive(Debug, Clone, FromRow)]
pub struct Accident {
    pub id: Uuid,
    pub occurred_on: NaiveDate,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub elevation_m: Option<Decimal>,
    pub activity: String,
    pub severity: String,
}

/// A single day's weather sample, shared by forecast and accident windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailySample {
    pub temperature_mean_c: f64,
    pub temperature_min_c: f64,
    pub temperature_max_c: f64,
    pub precipitation_total_mm: f64,
    pub wind_speed_mean_ms: f64,
    pub visibility_mean_km: f64,
    pub cloud_cover_mean_pct: f64,
}

/// Seven (or fewer, down to three) daily samples aligned to an accident,
/// days -6..=0 relative to the accident date, day 0 being the accident day.
#[derive(Debug, Clone, Default)]
pub struct AccidentWeatherWindow {
    pub days: Vec<DailySample>,
}

impl AccidentWeatherWindow {
    /// Usable per §3: >=3 days present (possibly truncated from 7).
    pub fn is_usable(&self) -> bool {
        self.days.len() >= 3
    }
}

/// Forecast window for a planning date, day 0 being the planning date,
/// same schema as `AccidentWeatherWindow`.
#[derive(Debug, Clone, Default)]
pub struct WeatherForecastWindow {
    pub days: Vec<DailySample>,
}

/// A named climbable feature, as stored (ids/decimals, joined with area).
#[derive(Debug, Clone, FromRow)]
pub struct RouteRow {
    pub id: Uuid,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub elevation_m: Option<Decimal>,
    pub route_type: String,
    pub area_id: Option<Uuid>,
}

/// In-memory, strongly-typed view of a route, used by the scorer and
/// kernels (avoids threading `Decimal`/`Option<Decimal>` through math code).
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: Option<f64>,
    pub route_type: RouteType,
}

/// Per (rounded coordinate, elevation band, season, reference month) bundle
/// of weighted mean/std for each weather variable, derived from ~5 years of
/// daily archive data (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationStats {
    pub temperature_mean: f64,
    pub temperature_std: f64,
    pub precipitation_mean: f64,
    pub precipitation_std: f64,
    pub wind_mean: f64,
    pub wind_std: f64,
    pub visibility_mean: f64,
    pub visibility_std: f64,
}

/// Per-kernel breakdown for a single contributing accident, retained for
/// explainability in the top-K list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Contribution {
    pub accident_id: Uuid,
    pub influence: f64,
    pub spatial: f64,
    pub temporal: f64,
    pub weather: f64,
    pub route_type: f64,
    pub severity: f64,
    pub elevation: f64,
}

/// A (route_id, date) risk prediction, the unit the result cache stores.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskPrediction {
    pub route_id: Uuid,
    pub date: NaiveDate,
    pub risk_score: f64,
    pub confidence: f64,
    pub contributions: Vec<Contribution>,
    pub computed_at: DateTime<Utc>,
}

impl RiskPrediction {
    pub fn empty(route_id: Uuid, date: NaiveDate, computed_at: DateTime<Utc>) -> Self {
        Self {
            route_id,
            date,
            risk_score: 0.0,
            confidence: 0.0,
            contributions: Vec::new(),
            computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_unknown_defaults_from_unrecognized_string() {
        assert_eq!(Severity::parse("banana"), Severity::Unknown);
        assert_eq!(Severity::parse(""), Severity::Unknown);
    }

    #[test]
    fn route_type_roundtrips_known_values() {
        for rt in [
            RouteType::Alpine,
            RouteType::Trad,
            RouteType::Sport,
            RouteType::Ice,
            RouteType::Mixed,
            RouteType::Aid,
        ] {
            assert_eq!(RouteType::parse(rt.as_str()), rt);
        }
    }

    #[test]
    fn route_type_unrecognized_is_other() {
        assert_eq!(RouteType::parse("bouldering"), RouteType::Other);
    }

    #[test]
    fn weather_window_usability_threshold() {
        let mut w = AccidentWeatherWindow::default();
        assert!(!w.is_usable());
        w.days = vec![
            DailySample {
                temperature_mean_c: 0.0,
                temperature_min_c: 0.0,
                temperature_max_c: 0.0,
                precipitation_total_mm: 0.0,
                wind_speed_mean_ms: 0.0,
                visibility_mean_km: 10.0,
                cloud_cover_mean_pct: 0.0,
            };
            3
        ];
        assert!(w.is_usable());
    }
}
