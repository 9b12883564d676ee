use std::collections::BTreeMap;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use salon_booking_api::errors::ServiceError;
use salon_booking_api::services::gateway::{
    GatewayPaymentStatus, HttpGateway, OrderRequest, PaymentGateway, RefundRequest,
};

fn gateway(server: &MockServer, timeout: Duration) -> HttpGateway {
    HttpGateway::new(server.uri(), "key_test", "secret_test", timeout).unwrap()
}

fn order_request(amount: i64) -> OrderRequest {
    let mut notes = BTreeMap::new();
    notes.insert("booking_id".to_string(), "b-1".to_string());
    OrderRequest {
        amount,
        currency: "INR".into(),
        receipt: "BK-20261020-0001".into(),
        notes,
    }
}

#[tokio::test]
async fn order_amount_is_sent_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(header_exists("authorization"))
        .and(body_json(json!({
            "amount": 6600,
            "currency": "INR",
            "receipt": "BK-20261020-0001",
            "notes": { "booking_id": "b-1" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_abc",
            "amount": 6600,
            "currency": "INR",
            "receipt": "BK-20261020-0001",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = gateway(&server, Duration::from_secs(5))
        .create_order(order_request(6_600))
        .await
        .unwrap();
    assert_eq!(order.id, "order_abc");
    assert_eq!(order.amount, 6_600);
}

#[tokio::test]
async fn payment_fetch_and_refund_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/pay_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pay_1",
            "order_id": "order_abc",
            "amount": 6600,
            "currency": "INR",
            "status": "captured",
            "method": "card"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payments/pay_1/refund"))
        .and(body_json(json!({ "amount": 6600, "receipt": "refund-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "rfnd_1",
            "payment_id": "pay_1",
            "amount": 6600,
            "status": "processed"
        })))
        .mount(&server)
        .await;

    let client = gateway(&server, Duration::from_secs(5));
    let payment = client.fetch_payment("pay_1").await.unwrap();
    assert_eq!(payment.status, GatewayPaymentStatus::Captured);
    assert_eq!(payment.order_id.as_deref(), Some("order_abc"));

    let refund = client
        .refund_payment(
            "pay_1",
            RefundRequest {
                amount: 6_600,
                receipt: "refund-1".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(refund.id, "rfnd_1");
}

#[tokio::test]
async fn server_errors_mean_the_gateway_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = gateway(&server, Duration::from_secs(5))
        .create_order(order_request(100))
        .await;
    assert_matches!(result, Err(ServiceError::GatewayUnavailable(_)));
}

#[tokio::test]
async fn rejected_requests_carry_the_gateway_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments/pay_9/capture"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "BAD_REQUEST_ERROR",
                "description": "payment already captured"
            }
        })))
        .mount(&server)
        .await;

    let result = gateway(&server, Duration::from_secs(5))
        .capture_payment("pay_9", 100, "INR")
        .await;
    assert_matches!(result, Err(ServiceError::InvalidRequest(message)) => {
        assert!(message.contains("payment already captured"));
    });
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/pay_slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "id": "pay_slow",
                    "amount": 100,
                    "currency": "INR",
                    "status": "captured"
                }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let result = gateway(&server, Duration::from_millis(100))
        .fetch_payment("pay_slow")
        .await;
    assert_matches!(result, Err(ServiceError::GatewayUnavailable(_)));
}
