use super::common::ok;
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orchestrator::{PendingPaymentResponse, RevenueQuery, RevenueResponse};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use uuid::Uuid;

pub fn salon_routes() -> Router<AppState> {
    Router::new()
        .route("/revenue", get(vendor_revenue))
        .route("/:id/payments/pending", get(pending_payments))
}

/// Payment legs still open on a salon's bookings
#[utoipa::path(
    get,
    path = "/api/v1/salons/{id}/payments/pending",
    params(("id" = Uuid, Path, description = "Salon id")),
    responses(
        (status = 200, description = "Pending legs, oldest booking first", body = ApiResponse<Vec<PendingPaymentResponse>>),
        (status = 403, description = "Salon belongs to another vendor", body = crate::errors::ErrorResponse),
        (status = 404, description = "Salon not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Salons"
)]
pub async fn pending_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<PendingPaymentResponse>>>, ServiceError> {
    let pending = state
        .services
        .orchestrator
        .pending_payments(&user, id)
        .await?;
    Ok(ok(pending))
}

/// Service payments collected across the caller's salons
#[utoipa::path(
    get,
    path = "/api/v1/salons/revenue",
    params(RevenueQuery),
    responses(
        (status = 200, description = "Revenue in the window", body = ApiResponse<RevenueResponse>),
        (status = 403, description = "Not a vendor", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Salons"
)]
pub async fn vendor_revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<ApiResponse<RevenueResponse>>, ServiceError> {
    let revenue = state
        .services
        .orchestrator
        .vendor_revenue(&user, query)
        .await?;
    Ok(ok(revenue))
}
