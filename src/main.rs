// Climbing Route Risk Engine — API v0.1
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod confidence;
mod db;
mod errors;
mod facade;
mod geo;
mod helpers;
mod kernels;
mod routes;
mod scheduler;
mod scorer;
mod store;
mod weather;

use config::AppConfig;
use routes::risk::AppState;
use scheduler::SchedulerStatus;
use store::PgStore;
use weather::provider::WeatherClient;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// Climbing Route Risk Engine — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Climbing Route Risk Engine",
        version = "0.1.0",
        description = "Predicts, for a climbing route and calendar date, a risk score \
            in [0,100] and a confidence score in [0,1], by aggregating historical \
            accidents weighted by spatial proximity, temporal recency, weather-pattern \
            similarity, route-type compatibility, severity, and elevation similarity.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Risk", description = "Risk prediction, bulk map reads, and operator triggers"),
    ),
    paths(
        routes::health::health_check,
        routes::risk::predict_route,
        routes::risk::map_bulk,
        routes::risk::recompute,
        routes::risk::scheduler_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            db::models::RiskPrediction,
            db::models::Contribution,
            routes::risk::MapEntryResponse,
            routes::risk::RecomputeResponse,
            scheduler::SchedulerStatus,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alpine_risk_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    let store = Arc::new(PgStore::new(pool));
    let weather = Arc::new(WeatherClient::new(
        &config.weather_user_agent,
        &config.weather_primary_base_url,
        config.weather_primary_api_key.clone(),
        &config.weather_fallback_base_url,
    ));
    let scoring_cfg = Arc::new(config.scoring.clone());

    let scheduler_status: scheduler::SharedSchedulerStatus = Arc::new(RwLock::new(SchedulerStatus::new()));

    // Spawn the nightly precomputation scheduler (C9), mirroring how the
    // teacher spawns its background forecast poller.
    tokio::spawn(scheduler::run_scheduler(
        Arc::clone(&store),
        Arc::clone(&weather),
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&scoring_cfg),
        scheduler_status.clone(),
    ));

    let app_state = AppState {
        store,
        weather,
        cfg: scoring_cfg,
        scheduler_status,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let risk_routes = Router::new()
        .route("/api/v1/risk/route/:route_id", get(routes::risk::predict_route))
        .route("/api/v1/risk/map", get(routes::risk::map_bulk))
        .route("/api/v1/risk/recompute", post(routes::risk::recompute))
        .route("/api/v1/risk/scheduler/status", get(routes::risk::scheduler_status))
        .with_state(app_state);

    let health_routes = Router::new().route("/api/v1/health", get(routes::health::health_check));

    let app = Router::new()
        .merge(health_routes)
        .merge(risk_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
