//! Injectable interfaces for C2 (spatial store), C3 (weather provider), C4's
//! cache, and C8 (result cache).
//!
//! The distilled spec calls for these as "injected trait objects" so the
//! scorer and scheduler can be driven by deterministic in-memory fakes in
//! tests. We use plain generic trait bounds rather than `dyn Trait` objects:
//! native async-fn-in-trait works directly with static dispatch and avoids
//! pulling in `async-trait`, a crate no example in this codebase's stack
//! uses (see DESIGN.md). `AppState` is generic over these two bounds and
//! monomorphizes to the Postgres/HTTP implementations in `main`.

use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::models::{
    Accident, AccidentWeatherWindow, DailySample, LocationStats, RiskPrediction, Route,
};
use crate::db::queries::{self, LocationStatsKey};
use crate::errors::AppError;
use crate::geo::Coord;
use crate::weather::provider::WeatherClient;

/// C2: spatial store adapter. `accidents_within` and `weather_windows_for`
/// back the scorer's candidate selection; `routes_bulk`/`get_route` back
/// the scheduler and on-demand façade respectively.
pub trait SpatialStore {
    async fn accidents_within(
        &self,
        center: Coord,
        radius_km: f64,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Accident>, AppError>;

    async fn weather_windows_for(
        &self,
        accident_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, AccidentWeatherWindow>, AppError>;

    async fn routes_bulk(&self, after: Option<Uuid>, page_size: i64) -> Result<Vec<Route>, AppError>;

    async fn get_route(&self, route_id: Uuid) -> Result<Option<Route>, AppError>;
}

/// C3: weather provider. `None` on irrecoverable failure in both
/// operations — the scorer treats that as "no data this call" (§7
/// WeatherUnavailable), never as a hard error.
pub trait WeatherProvider {
    async fn forecast_window(
        &self,
        coord: Coord,
        anchor_date: NaiveDate,
    ) -> Option<crate::db::models::WeatherForecastWindow>;

    async fn archive_daily(
        &self,
        coord: Coord,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Vec<DailySample>>;
}

/// C4's LocationStats cache, kept as its own trait since its lifecycle (24h
/// TTL, short-lived "unavailable" sentinel) is distinct from the C8 result
/// cache below.
pub trait LocationStatsCache {
    async fn get(&self, key: LocationStatsKey) -> Result<Option<LocationStats>, AppError>;
    async fn set(&self, key: LocationStatsKey, stats: &LocationStats, ttl_hours: i64) -> Result<(), AppError>;
    /// §4.3 step 5: has a recent archive fetch for `key` already failed?
    async fn is_unavailable(&self, key: LocationStatsKey) -> Result<bool, AppError>;
    /// Mark `key` as unavailable for `ttl_minutes` after an archive failure.
    async fn set_unavailable(&self, key: LocationStatsKey, ttl_minutes: i64) -> Result<(), AppError>;
}

/// C8: the bulk result cache.
pub trait ResultCache {
    async fn get_one(&self, route_id: Uuid, date: NaiveDate) -> Result<Option<RiskPrediction>, AppError>;
    async fn set_one(&self, prediction: &RiskPrediction, ttl_hours: i64) -> Result<(), AppError>;
    async fn get_many(
        &self,
        pairs: &[(Uuid, NaiveDate)],
    ) -> Result<Vec<Option<RiskPrediction>>, AppError>;
    async fn set_many(&self, predictions: &[RiskPrediction], ttl_days: i64) -> Result<(), AppError>;
}

/// Postgres-backed implementation of C2, C4's cache, and C8, sharing a
/// single pool exactly as the teacher's `AppState { pool, .. }` does.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl SpatialStore for PgStore {
    async fn accidents_within(
        &self,
        center: Coord,
        radius_km: f64,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Accident>, AppError> {
        queries::accidents_within(&self.pool, center.lat, center.lon, radius_km, since)
            .await
            .map_err(crate::errors::classify_storage_error)
    }

    async fn weather_windows_for(
        &self,
        accident_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, AccidentWeatherWindow>, AppError> {
        let windows = queries::weather_windows_for(&self.pool, accident_ids)
            .await
            .map_err(crate::errors::classify_storage_error)?;
        Ok(accident_ids.iter().copied().zip(windows).collect())
    }

    async fn routes_bulk(&self, after: Option<Uuid>, page_size: i64) -> Result<Vec<Route>, AppError> {
        queries::routes_bulk(&self.pool, after, page_size)
            .await
            .map_err(crate::errors::classify_storage_error)
    }

    async fn get_route(&self, route_id: Uuid) -> Result<Option<Route>, AppError> {
        queries::get_route(&self.pool, route_id)
            .await
            .map_err(crate::errors::classify_storage_error)
    }
}

impl LocationStatsCache for PgStore {
    async fn get(&self, key: LocationStatsKey) -> Result<Option<LocationStats>, AppError> {
        Ok(queries::get_location_stats(&self.pool, key).await?)
    }

    async fn set(&self, key: LocationStatsKey, stats: &LocationStats, ttl_hours: i64) -> Result<(), AppError> {
        Ok(queries::set_location_stats(&self.pool, key, stats, ttl_hours).await?)
    }

    async fn is_unavailable(&self, key: LocationStatsKey) -> Result<bool, AppError> {
        Ok(queries::is_location_stats_unavailable(&self.pool, key).await?)
    }

    async fn set_unavailable(&self, key: LocationStatsKey, ttl_minutes: i64) -> Result<(), AppError> {
        Ok(queries::set_location_stats_unavailable(&self.pool, key, ttl_minutes).await?)
    }
}

impl ResultCache for PgStore {
    async fn get_one(&self, route_id: Uuid, date: NaiveDate) -> Result<Option<RiskPrediction>, AppError> {
        Ok(queries::get_one(&self.pool, route_id, date).await?)
    }

    async fn set_one(&self, prediction: &RiskPrediction, ttl_hours: i64) -> Result<(), AppError> {
        Ok(queries::set_one(&self.pool, prediction, ttl_hours).await?)
    }

    async fn get_many(
        &self,
        pairs: &[(Uuid, NaiveDate)],
    ) -> Result<Vec<Option<RiskPrediction>>, AppError> {
        Ok(queries::get_many(&self.pool, pairs).await?)
    }

    async fn set_many(&self, predictions: &[RiskPrediction], ttl_days: i64) -> Result<(), AppError> {
        Ok(queries::set_many(&self.pool, predictions, ttl_days).await?)
    }
}

impl WeatherProvider for WeatherClient {
    async fn forecast_window(
        &self,
        coord: Coord,
        anchor_date: NaiveDate,
    ) -> Option<crate::db::models::WeatherForecastWindow> {
        WeatherClient::forecast_window(self, coord, anchor_date).await
    }

    async fn archive_daily(
        &self,
        coord: Coord,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Vec<DailySample>> {
        WeatherClient::archive_daily(self, coord, start, end).await
    }
}

#[cfg(test)]
pub mod fakes {
    //! Deterministic, seedable in-memory fakes for C2/C3/C4/C8, used by
    //! `scorer`, `facade`, and `scheduler` unit tests instead of a live
    //! Postgres instance or network weather provider.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSpatialStore {
        pub accidents: Vec<Accident>,
        pub windows: HashMap<Uuid, AccidentWeatherWindow>,
        pub routes: Vec<Route>,
    }

    impl SpatialStore for FakeSpatialStore {
        async fn accidents_within(
            &self,
            _center: Coord,
            _radius_km: f64,
            since: Option<NaiveDate>,
        ) -> Result<Vec<Accident>, AppError> {
            Ok(self
                .accidents
                .iter()
                .filter(|a| since.map_or(true, |s| a.occurred_on >= s))
                .cloned()
                .collect())
        }

        async fn weather_windows_for(
            &self,
            accident_ids: &[Uuid],
        ) -> Result<HashMap<Uuid, AccidentWeatherWindow>, AppError> {
            Ok(accident_ids
                .iter()
                .filter_map(|id| self.windows.get(id).map(|w| (*id, w.clone())))
                .collect())
        }

        async fn routes_bulk(&self, after: Option<Uuid>, page_size: i64) -> Result<Vec<Route>, AppError> {
            Ok(self
                .routes
                .iter()
                .filter(|r| after.map_or(true, |a| r.id > a))
                .take(page_size as usize)
                .copied()
                .collect())
        }

        async fn get_route(&self, route_id: Uuid) -> Result<Option<Route>, AppError> {
            Ok(self.routes.iter().find(|r| r.id == route_id).copied())
        }
    }

    #[derive(Default)]
    pub struct FakeWeatherProvider {
        pub forecast: Option<crate::db::models::WeatherForecastWindow>,
        pub archive: Option<Vec<DailySample>>,
    }

    impl WeatherProvider for FakeWeatherProvider {
        async fn forecast_window(
            &self,
            _coord: Coord,
            _anchor_date: NaiveDate,
        ) -> Option<crate::db::models::WeatherForecastWindow> {
            self.forecast.clone()
        }

        async fn archive_daily(
            &self,
            _coord: Coord,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Option<Vec<DailySample>> {
            self.archive.clone()
        }
    }

    #[derive(Default)]
    pub struct FakeLocationStatsCache {
        pub stats: Mutex<HashMap<(i64, i64, i32, i32), LocationStats>>,
        pub unavailable: Mutex<std::collections::HashSet<(i64, i64, i32, i32)>>,
    }

    fn key_tuple(key: LocationStatsKey) -> (i64, i64, i32, i32) {
        (
            (key.lat_round * 1e6) as i64,
            (key.lon_round * 1e6) as i64,
            key.elevation_band,
            key.reference_month,
        )
    }

    impl LocationStatsCache for FakeLocationStatsCache {
        async fn get(&self, key: LocationStatsKey) -> Result<Option<LocationStats>, AppError> {
            Ok(self.stats.lock().unwrap().get(&key_tuple(key)).cloned())
        }

        async fn set(&self, key: LocationStatsKey, stats: &LocationStats, _ttl_hours: i64) -> Result<(), AppError> {
            self.stats.lock().unwrap().insert(key_tuple(key), stats.clone());
            Ok(())
        }

        async fn is_unavailable(&self, key: LocationStatsKey) -> Result<bool, AppError> {
            Ok(self.unavailable.lock().unwrap().contains(&key_tuple(key)))
        }

        async fn set_unavailable(&self, key: LocationStatsKey, _ttl_minutes: i64) -> Result<(), AppError> {
            self.unavailable.lock().unwrap().insert(key_tuple(key));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeResultCache {
        pub entries: Mutex<HashMap<(Uuid, NaiveDate), RiskPrediction>>,
    }

    impl ResultCache for FakeResultCache {
        async fn get_one(&self, route_id: Uuid, date: NaiveDate) -> Result<Option<RiskPrediction>, AppError> {
            Ok(self.entries.lock().unwrap().get(&(route_id, date)).cloned())
        }

        async fn set_one(&self, prediction: &RiskPrediction, _ttl_hours: i64) -> Result<(), AppError> {
            self.entries
                .lock()
                .unwrap()
                .insert((prediction.route_id, prediction.date), prediction.clone());
            Ok(())
        }

        async fn get_many(
            &self,
            pairs: &[(Uuid, NaiveDate)],
        ) -> Result<Vec<Option<RiskPrediction>>, AppError> {
            let entries = self.entries.lock().unwrap();
            Ok(pairs.iter().map(|k| entries.get(k).cloned()).collect())
        }

        async fn set_many(&self, predictions: &[RiskPrediction], _ttl_days: i64) -> Result<(), AppError> {
            let mut entries = self.entries.lock().unwrap();
            for p in predictions {
                entries.insert((p.route_id, p.date), p.clone());
            }
            Ok(())
        }
    }
}
