mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::{booking_date, customer, response_json, send, webhook_body, Harness};
use salon_booking_api::services::gateway::GatewayPaymentStatus;

async fn post_webhook(h: &Harness, body: Vec<u8>, signature: Option<String>) -> axum::response::Response {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    h.router()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// Creates a booking and its gateway order over HTTP; returns (booking id, order id)
async fn book_over_http(h: &Harness, token: &str) -> (String, String) {
    let seeded = h.seed_salon().await;
    let router = h.router();

    let response = send(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(token),
        Some(json!({
            "salon_id": seeded.salon.id,
            "services": [{ "service_id": seeded.haircut.id, "quantity": 1 }],
            "booking_date": booking_date(),
            "booking_time": "11:00",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["success"], true);
    assert_eq!(created["data"]["status"], "pending");
    let booking_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = send(
        &router,
        Method::POST,
        "/api/v1/payments/create-order",
        Some(token),
        Some(json!({ "booking_id": booking_id })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = response_json(response).await;
    assert_eq!(order["data"]["amount_minor_units"], 3_000);
    let order_id = order["data"]["order_id"].as_str().unwrap().to_string();
    (booking_id, order_id)
}

#[tokio::test]
async fn webhook_with_bad_signature_is_a_bad_request() {
    let h = Harness::new().await;
    let body = webhook_body("payment.captured", "pay_1", "order_1", 3_000);

    let response = post_webhook(&h, body.clone(), Some("deadbeef".into())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_webhook(&h, body, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn captured_webhook_confirms_and_replays_are_acknowledged() {
    let h = Harness::new().await;
    let user = customer();
    let token = h.token(&user);
    let (booking_id, order_id) = book_over_http(&h, &token).await;
    let payment_id = h.gateway.pay(&order_id, GatewayPaymentStatus::Captured);

    let body = webhook_body("payment.captured", &payment_id, &order_id, 3_000);
    let signature = h.sign_webhook(&body);

    let response = post_webhook(&h, body.clone(), Some(signature.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["outcome"], "confirmed");
    assert_eq!(outcome["already_processed"], false);

    let response = post_webhook(&h, body, Some(signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["already_processed"], true);

    let response = send(
        &h.router(),
        Method::GET,
        &format!("/api/v1/bookings/{}", booking_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let details = response_json(response).await;
    assert_eq!(details["data"]["status"], "confirmed");
}

#[tokio::test]
async fn capture_for_cancelled_booking_is_acknowledged() {
    let h = Harness::new().await;
    let user = customer();
    let token = h.token(&user);
    let (booking_id, order_id) = book_over_http(&h, &token).await;

    let response = send(
        &h.router(),
        Method::POST,
        &format!("/api/v1/bookings/{}/cancel", booking_id),
        Some(&token),
        Some(json!({ "reason": "changed my mind" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let payment_id = h.gateway.pay(&order_id, GatewayPaymentStatus::Captured);
    let body = webhook_body("payment.captured", &payment_id, &order_id, 3_000);
    let signature = h.sign_webhook(&body);
    let response = post_webhook(&h, body, Some(signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["outcome"], "refunded");
    assert_eq!(outcome["refund_status"], "processed");
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn unknown_events_are_acknowledged_and_ignored() {
    let h = Harness::new().await;
    let body = br#"{"event":"settlement.processed","payload":{}}"#.to_vec();
    let signature = h.sign_webhook(&body);

    let response = post_webhook(&h, body, Some(signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["outcome"], "ignored");
    assert_eq!(outcome["event"], "settlement.processed");
}

#[tokio::test]
async fn verify_requires_a_bearer_token() {
    let h = Harness::new().await;
    let user = customer();
    let token = h.token(&user);
    let (_booking_id, order_id) = book_over_http(&h, &token).await;
    let payment_id = h.gateway.pay(&order_id, GatewayPaymentStatus::Captured);
    let payload = json!({
        "order_id": order_id,
        "payment_id": payment_id,
        "signature": h.sign_payment(&order_id, &payment_id),
    });
    let router = h.router();

    let response = send(
        &router,
        Method::POST,
        "/api/v1/payments/verify",
        None,
        Some(payload.clone()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &router,
        Method::POST,
        "/api/v1/payments/verify",
        Some(&token),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let confirmation = response_json(response).await;
    assert_eq!(confirmation["data"]["success"], true);
    assert_eq!(confirmation["data"]["already_processed"], false);
    assert_eq!(confirmation["data"]["payment_type"], "convenience_fee");

    let response = send(
        &router,
        Method::POST,
        "/api/v1/payments/verify",
        Some(&token),
        Some(payload),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let confirmation = response_json(response).await;
    assert_eq!(confirmation["data"]["already_processed"], true);
}

#[tokio::test]
async fn tampered_verify_is_a_bad_request() {
    let h = Harness::new().await;
    let user = customer();
    let token = h.token(&user);
    let (_booking_id, order_id) = book_over_http(&h, &token).await;
    let payment_id = h.gateway.pay(&order_id, GatewayPaymentStatus::Captured);

    let response = send(
        &h.router(),
        Method::POST,
        "/api/v1/payments/verify",
        Some(&token),
        Some(json!({
            "order_id": order_id,
            "payment_id": payment_id,
            "signature": h.sign_payment(&order_id, "pay_other"),
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn fee_settings_are_admin_only() {
    let h = Harness::new().await;
    let router = h.router();
    let payload = json!({ "key": "convenience_fee_percent", "value": "7.5" });

    let customer_token = h.token(&customer());
    let response = send(
        &router,
        Method::PUT,
        "/api/v1/admin/fee-settings",
        Some(&customer_token),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = salon_booking_api::auth::AuthUser::new(
        uuid::Uuid::new_v4(),
        salon_booking_api::auth::Role::Admin,
    );
    let response = send(
        &router,
        Method::PUT,
        "/api/v1/admin/fee-settings",
        Some(&h.token(&admin)),
        Some(payload),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let settings = response_json(response).await;
    assert_eq!(settings["data"]["convenience_fee_percent"], "7.5");
}

#[tokio::test]
async fn health_reports_database_status() {
    let h = Harness::new().await;
    let response = send(&h.router(), Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}
