use super::common::{created, ok, ok_with_message};
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::{
    bookings::{
        BookingDetails, BookingFilters, BookingListResponse, BookingResponse,
        CreateBookingRequest, PaymentLegResponse, QuoteRequest,
    },
    fees::FeeQuote,
    orchestrator::{
        BookingCreatedResponse, CancelBookingRequest, CancellationResponse,
        CompleteBookingRequest, ManualPaymentRequest,
    },
};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_booking).get(list_bookings))
        .route("/quote", post(quote_booking))
        .route("/:id", get(get_booking))
        .route("/:id/cancel", post(cancel_booking))
        .route("/:id/complete", post(complete_booking))
        .route("/:id/payments/manual", post(record_manual_payment))
}

/// Price a cart without booking it
#[utoipa::path(
    post,
    path = "/api/v1/bookings/quote",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Fee breakdown", body = ApiResponse<FeeQuote>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Salon not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn quote_booking(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<ApiResponse<FeeQuote>>, ServiceError> {
    let quote = state.services.orchestrator.quote(request).await?;
    Ok(ok(quote))
}

/// Create a booking with its convenience-fee and service-payment legs
#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking created", body = ApiResponse<BookingCreatedResponse>),
        (status = 400, description = "Invalid request or payment proof", body = crate::errors::ErrorResponse),
        (status = 403, description = "Only customers can book", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment order already used", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn create_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BookingCreatedResponse>>), ServiceError> {
    let booking = state
        .services
        .orchestrator
        .create_booking(&user, request)
        .await?;
    Ok(created(booking))
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings",
    params(BookingFilters),
    responses(
        (status = 200, description = "Bookings visible to the caller", body = ApiResponse<BookingListResponse>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn list_bookings(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filters): Query<BookingFilters>,
) -> Result<Json<ApiResponse<BookingListResponse>>, ServiceError> {
    let bookings = state
        .services
        .orchestrator
        .list_bookings(&user, filters)
        .await?;
    Ok(ok(bookings))
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings/{id}",
    params(("id" = Uuid, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking with items and payment legs", body = ApiResponse<BookingDetails>),
        (status = 403, description = "Not visible to the caller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Booking not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn get_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BookingDetails>>, ServiceError> {
    let booking = state.services.orchestrator.get_booking(&user, id).await?;
    Ok(ok(booking))
}

/// Cancel a booking; a paid convenience fee is refunded
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/cancel",
    params(("id" = Uuid, Path, description = "Booking id")),
    request_body = CancelBookingRequest,
    responses(
        (status = 200, description = "Booking cancelled", body = ApiResponse<CancellationResponse>),
        (status = 400, description = "Booking cannot be cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the customer or salon", body = crate::errors::ErrorResponse),
        (status = 404, description = "Booking not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelBookingRequest>>,
) -> Result<Json<ApiResponse<CancellationResponse>>, ServiceError> {
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let cancellation = state
        .services
        .orchestrator
        .cancel_booking(&user, id, request)
        .await?;
    let message = cancellation.message.clone();
    Ok(ok_with_message(cancellation, message))
}

#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/complete",
    params(("id" = Uuid, Path, description = "Booking id")),
    request_body = CompleteBookingRequest,
    responses(
        (status = 200, description = "Booking completed", body = ApiResponse<BookingResponse>),
        (status = 400, description = "Booking is not confirmed or unpaid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller does not operate the salon", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn complete_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<CompleteBookingRequest>>,
) -> Result<Json<ApiResponse<BookingResponse>>, ServiceError> {
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let booking = state
        .services
        .orchestrator
        .complete_booking(&user, id, request)
        .await?;
    Ok(ok(booking))
}

/// Record the service price as collected at the salon
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/payments/manual",
    params(("id" = Uuid, Path, description = "Booking id")),
    request_body = ManualPaymentRequest,
    responses(
        (status = 200, description = "Payment recorded", body = ApiResponse<PaymentLegResponse>),
        (status = 403, description = "Caller does not operate the salon", body = crate::errors::ErrorResponse),
        (status = 409, description = "Service payment already recorded", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Bookings"
)]
pub async fn record_manual_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ManualPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentLegResponse>>, ServiceError> {
    let leg = state
        .services
        .orchestrator
        .record_manual_payment(&user, id, request)
        .await?;
    Ok(ok(leg))
}
