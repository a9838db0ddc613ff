//! Liveness and readiness endpoints. Both are public.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiResponse, AppState};
use crate::constants::labels;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthReadinessChecks {
    pub database: bool,
    pub cluster: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReadyResponse {
    pub ready: bool,
    pub checks: HealthReadinessChecks,
}

/// `GET /api/ping`
pub async fn ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(PingResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }))
}

/// `GET /api/health/ready`
///
/// Checks the database and that the cluster API answers a list call.
pub async fn health_ready(State(state): State<Arc<AppState>>) -> Response {
    let db_ready = state.shared.store.ping().await.is_ok();

    let managed = format!("{}={}", labels::CREATED_BY, labels::CREATED_BY_VALUE);
    let cluster_ready = match state.shared.cluster.list_services(&managed).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Cluster readiness check failed");
            false
        }
    };

    let ready = db_ready && cluster_ready;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ApiResponse::success(HealthReadyResponse {
            ready,
            checks: HealthReadinessChecks {
                database: db_ready,
                cluster: cluster_ready,
            },
        })),
    )
        .into_response()
}
