use crate::handlers::AppState;
use crate::ApiResponse;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service version", body = ApiResponse<StatusResponse>)),
    tag = "Health"
)]
pub async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::success(StatusResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// 503 when the database does not answer
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Healthy", body = ApiResponse<HealthResponse>),
        (status = 503, description = "Database unreachable", body = ApiResponse<HealthResponse>)
    ),
    tag = "Health"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database = match crate::db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!(error = %e, "health check: database unreachable");
            "unhealthy"
        }
    };
    let healthy = database == "healthy";
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ApiResponse::success(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            database,
            timestamp: Utc::now().to_rfc3339(),
        })),
    )
}
