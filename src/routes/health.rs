use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn check_component<F, T, E>(check: F) -> ComponentHealth
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    match check.await {
        Ok(_) => ComponentHealth {
            status: "ok",
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error",
            latency_ms: None,
        },
    }
}

/// GET /health: database and queue connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = check_component(sqlx::query("SELECT 1").execute(&state.db)).await;
    let queue = check_component(state.queue.health_check()).await;

    if let Ok(depth) = state.queue.depth().await {
        metrics::gauge!("import_queue_depth").set(depth as f64);
    }

    let healthy = database.is_ok() && queue.is_ok();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks { database, queue },
    };

    (status_code, Json(response))
}
