use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::webhooks::WebhookOutcome;
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "x-signature";

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw gateway event; signed as-is", content_type = "application/json"),
    params(("X-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookOutcome),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);

    let outcome = state
        .services
        .orchestrator
        .handle_webhook(&body, signature)
        .await?;
    info!(outcome = ?outcome, "payment webhook handled");
    Ok(Json(outcome))
}
