use super::common::{ok, ok_with_message};
use crate::auth::{AuthUser, Role};
use crate::entities::platform_setting::{BOOKING_FEE_PERCENT, CONVENIENCE_FEE_PERCENT, GST_PERCENT};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::{
    fee_settings::FeeSettings,
    orchestrator::{RefundRetrySummary, RevenueQuery, RevenueResponse},
};
use crate::ApiResponse;
use axum::{
    extract::{Json, Query, State},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/fee-settings", put(update_fee_setting))
        .route("/fee-settings/clear-cache", post(clear_fee_cache))
        .route("/refunds/retry", post(retry_refunds))
        .route("/revenue", get(platform_revenue))
}

/// Which percentage to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeeSettingKey {
    ConvenienceFeePercent,
    BookingFeePercent,
    GstPercent,
}

impl FeeSettingKey {
    fn column_key(self) -> &'static str {
        match self {
            FeeSettingKey::ConvenienceFeePercent => CONVENIENCE_FEE_PERCENT,
            FeeSettingKey::BookingFeePercent => BOOKING_FEE_PERCENT,
            FeeSettingKey::GstPercent => GST_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateFeeSettingRequest {
    pub key: FeeSettingKey,
    /// Percentage between 0 and 100
    pub value: Decimal,
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/fee-settings",
    request_body = UpdateFeeSettingRequest,
    responses(
        (status = 200, description = "Setting stored; fresh snapshot returned", body = ApiResponse<FeeSettings>),
        (status = 400, description = "Out of range", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_fee_setting(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateFeeSettingRequest>,
) -> Result<Json<ApiResponse<FeeSettings>>, ServiceError> {
    user.require_role(&[Role::Admin])?;
    let store = &state.services.fee_settings;
    store.set(request.key.column_key(), request.value).await?;
    let snapshot = store.snapshot().await?;
    info!(admin = %user.user_id, key = ?request.key, value = %request.value, "fee setting changed");
    Ok(ok(FeeSettings::clone(&snapshot)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/fee-settings/clear-cache",
    responses(
        (status = 200, description = "Cache dropped; reloaded snapshot returned", body = ApiResponse<FeeSettings>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn clear_fee_cache(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<FeeSettings>>, ServiceError> {
    user.require_role(&[Role::Admin])?;
    let store = &state.services.fee_settings;
    store.invalidate().await;
    let snapshot = store.snapshot().await?;
    Ok(ok_with_message(
        FeeSettings::clone(&snapshot),
        "Fee settings cache cleared",
    ))
}

/// Re-issue refunds whose gateway call failed
#[utoipa::path(
    post,
    path = "/api/v1/admin/refunds/retry",
    responses(
        (status = 200, description = "Retry summary", body = ApiResponse<RefundRetrySummary>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn retry_refunds(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<RefundRetrySummary>>, ServiceError> {
    user.require_role(&[Role::Admin])?;
    let summary = state.services.orchestrator.retry_failed_refunds().await?;
    Ok(ok(summary))
}

/// Convenience fees collected by the platform
#[utoipa::path(
    get,
    path = "/api/v1/admin/revenue",
    params(RevenueQuery),
    responses(
        (status = 200, description = "Platform revenue in the window", body = ApiResponse<RevenueResponse>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn platform_revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<ApiResponse<RevenueResponse>>, ServiceError> {
    let revenue = state
        .services
        .orchestrator
        .platform_revenue(&user, query)
        .await?;
    Ok(ok(revenue))
}
