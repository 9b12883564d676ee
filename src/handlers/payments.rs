use super::common::ok;
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::{
    orchestrator::{
        CreatePaymentOrderRequest, CreateRegistrationOrderRequest, PaymentConfirmation,
        PaymentOrderResponse, VerifyPaymentRequest,
    },
    Caller,
};
use crate::ApiResponse;
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_payment_order))
        .route("/verify", post(verify_payment))
        .route(
            "/registration/create-order",
            post(create_registration_order),
        )
}

/// Open a gateway order for a booking's convenience fee
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    request_body = CreatePaymentOrderRequest,
    responses(
        (status = 200, description = "Gateway order ready for checkout", body = ApiResponse<PaymentOrderResponse>),
        (status = 403, description = "Not the booking's customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Booking not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Booking already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreatePaymentOrderRequest>,
) -> Result<Json<ApiResponse<PaymentOrderResponse>>, ServiceError> {
    let order = state
        .services
        .orchestrator
        .create_payment_order(&user, request.booking_id)
        .await?;
    Ok(ok(order))
}

/// Confirm a payment after checkout. Safe to retry.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed (or already confirmed)", body = ApiResponse<PaymentConfirmation>),
        (status = 400, description = "Invalid payment signature", body = crate::errors::ErrorResponse),
        (status = 403, description = "Payment belongs to another account", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentConfirmation>>, ServiceError> {
    let confirmation = state
        .services
        .orchestrator
        .verify_payment(Caller::User(&user), request)
        .await?;
    let message = confirmation.message.clone();
    Ok(Json(ApiResponse::success(confirmation).with_message(message)))
}

/// Open a gateway order for an approved vendor's registration fee
#[utoipa::path(
    post,
    path = "/api/v1/payments/registration/create-order",
    request_body = CreateRegistrationOrderRequest,
    responses(
        (status = 200, description = "Gateway order ready for checkout", body = ApiResponse<PaymentOrderResponse>),
        (status = 400, description = "Vendor request is not approved", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the requesting vendor", body = crate::errors::ErrorResponse),
        (status = 409, description = "Registration already paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_registration_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateRegistrationOrderRequest>,
) -> Result<Json<ApiResponse<PaymentOrderResponse>>, ServiceError> {
    let order = state
        .services
        .orchestrator
        .create_registration_order(&user, request.vendor_request_id)
        .await?;
    Ok(ok(order))
}
