//! Gateway webhook envelopes.
//!
//! Parsing happens only after the body signature has been checked against
//! the raw bytes.

use crate::{entities::RefundStatus, errors::ServiceError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const ORDER_PAID: &str = "order.paid";
pub const PAYMENT_FAILED: &str = "payment.failed";

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    payment: Option<Wrapped<PaymentEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

/// The payment object carried by payment and order events. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `payment.captured` or `order.paid`
    PaymentCaptured(PaymentEntity),
    PaymentFailed(PaymentEntity),
    Unrecognized(String),
}

impl WebhookEvent {
    pub fn parse(raw_body: &[u8]) -> Result<Self, ServiceError> {
        let envelope: Envelope = serde_json::from_slice(raw_body)?;
        let entity = || {
            envelope
                .payload
                .payment
                .clone()
                .map(|wrapped| wrapped.entity)
                .ok_or_else(|| {
                    ServiceError::InvalidRequest(format!(
                        "{} event carries no payment entity",
                        envelope.event
                    ))
                })
        };

        Ok(match envelope.event.as_str() {
            PAYMENT_CAPTURED | ORDER_PAID => WebhookEvent::PaymentCaptured(entity()?),
            PAYMENT_FAILED => WebhookEvent::PaymentFailed(entity()?),
            _ => WebhookEvent::Unrecognized(envelope.event.clone()),
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            WebhookEvent::PaymentCaptured(_) => PAYMENT_CAPTURED,
            WebhookEvent::PaymentFailed(_) => PAYMENT_FAILED,
            WebhookEvent::Unrecognized(event) => event,
        }
    }
}

/// What the webhook did. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Confirmed {
        order_id: String,
        already_processed: bool,
    },
    PaymentFailed {
        order_id: String,
    },
    /// Captured after the booking was cancelled; the payment is being refunded
    Refunded {
        order_id: String,
        refund_id: Uuid,
        refund_status: RefundStatus,
        already_processed: bool,
    },
    /// Verified but not applied to the booking, for an operator to resolve
    Held {
        order_id: String,
        reason: String,
    },
    Ignored {
        event: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn captured_and_order_paid_share_a_variant() {
        for event in [PAYMENT_CAPTURED, ORDER_PAID] {
            let body = format!(
                r#"{{"event":"{}","payload":{{"payment":{{"entity":{{"id":"pay_1","order_id":"order_1","amount":6600,"status":"captured","method":"upi"}}}}}}}}"#,
                event
            );
            let parsed = WebhookEvent::parse(body.as_bytes()).unwrap();
            assert_matches!(parsed, WebhookEvent::PaymentCaptured(entity) => {
                assert_eq!(entity.order_id.as_deref(), Some("order_1"));
                assert_eq!(entity.amount, 6600);
                assert_eq!(entity.method.as_deref(), Some("upi"));
            });
        }
    }

    #[test]
    fn failure_carries_description() {
        let body = br#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_9","order_id":"order_9","amount":6600,"status":"failed","error_description":"card declined"}}}}"#;
        assert_matches!(
            WebhookEvent::parse(body).unwrap(),
            WebhookEvent::PaymentFailed(entity) if entity.error_description.as_deref() == Some("card declined")
        );
    }

    #[test]
    fn unknown_events_are_kept_by_name() {
        let body = br#"{"event":"refund.processed","payload":{}}"#;
        assert_eq!(
            WebhookEvent::parse(body).unwrap(),
            WebhookEvent::Unrecognized("refund.processed".into())
        );
    }

    #[test]
    fn captured_event_without_entity_is_invalid() {
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        assert_matches!(WebhookEvent::parse(body), Err(ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert_matches!(
            WebhookEvent::parse(b"{not json"),
            Err(ServiceError::InvalidRequest(_))
        );
    }
}
