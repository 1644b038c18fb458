use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use huella_import::app_state::AppState;
use huella_import::config::AppConfig;
use huella_import::db;
use huella_import::routes;
use huella_import::services::{queue::PassQueue, storage::ObjectStore, tokens::TokenVerifier};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing huella-import API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("imports_created_total", "Source files uploaded");
    metrics::describe_histogram!("import_upload_bytes", "Size of uploaded source files");
    metrics::describe_gauge!(
        "import_queue_depth",
        "Validation passes waiting in the queue, sampled on health checks"
    );
    metrics::describe_counter!(
        "import_passes_queued_total",
        "Validation passes queued (initial and after corrections)"
    );
    metrics::describe_counter!(
        "import_corrections_applied_total",
        "Corrections stored against an incident"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, 20)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object storage client");
    let storage = ObjectStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage");

    tracing::info!("Connecting to Redis validation queue");
    let queue = PassQueue::new(&config.redis_url).expect("Failed to initialize validation queue");

    let tokens = TokenVerifier::new(&config.jwt_secret);

    let state = AppState::new(db_pool, storage, queue, tokens);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/imports",
            get(routes::imports::list_imports).post(routes::imports::create_import),
        )
        .route("/imports/{id}", get(routes::imports::get_import))
        .route(
            "/imports/{id}/error-report",
            get(routes::imports::get_error_report),
        )
        .route("/imports/{id}/process", post(routes::imports::process_import))
        .route(
            "/imports/{id}/apply-corrections",
            post(routes::imports::apply_corrections),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    tracing::info!("Starting huella-import on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
