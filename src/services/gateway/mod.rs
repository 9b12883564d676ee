//! Payment gateway seam.
//!
//! `PaymentGateway` covers the remote calls (orders, payment lookup, capture,
//! refunds); `GatewaySignatures` covers the local HMAC checks on client
//! callbacks and webhook bodies. Tests swap the trait object for an
//! in-process fake.

pub mod http;

use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub use http::HttpGateway;

type HmacSha256 = Hmac<Sha256>;

/// Order creation payload. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentStatus {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: GatewayPaymentStatus,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundRequest {
    pub amount: i64,
    /// Idempotency receipt, the refund row id
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder, ServiceError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError>;

    async fn capture_payment(
        &self,
        payment_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayPayment, ServiceError>;

    async fn refund_payment(
        &self,
        payment_id: &str,
        request: RefundRequest,
    ) -> Result<GatewayRefund, ServiceError>;
}

/// Bounds a gateway call; an elapsed deadline becomes `GatewayUnavailable`
pub async fn bounded<T, F>(deadline: Duration, operation: &str, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("salon_gateway.timeouts", 1);
            warn!(operation, ?deadline, "gateway call timed out");
            Err(ServiceError::GatewayUnavailable(format!(
                "{} timed out after {:?}",
                operation, deadline
            )))
        }
    }
}

/// HMAC-SHA256 checks for payment callbacks and webhook deliveries
#[derive(Clone)]
pub struct GatewaySignatures {
    key_secret: String,
    webhook_secret: String,
}

impl std::fmt::Debug for GatewaySignatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySignatures").finish_non_exhaustive()
    }
}

impl GatewaySignatures {
    pub fn new(key_secret: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            key_secret: key_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Hex HMAC of `order_id|payment_id` under the key secret
    pub fn sign_payment(&self, order_id: &str, payment_id: &str) -> String {
        sign(&self.key_secret, payment_message(order_id, payment_id).as_bytes())
    }

    /// Hex HMAC of the raw webhook body under the webhook secret
    pub fn sign_webhook(&self, body: &[u8]) -> String {
        sign(&self.webhook_secret, body)
    }

    pub fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), ServiceError> {
        if verify(
            &self.key_secret,
            payment_message(order_id, payment_id).as_bytes(),
            signature,
        ) {
            Ok(())
        } else {
            metrics::counter!("salon_payments.signature_rejected", 1, "source" => "client");
            warn!(
                target: "security",
                order_id,
                payment_id,
                "payment signature mismatch"
            );
            Err(ServiceError::SignatureInvalid)
        }
    }

    pub fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> Result<(), ServiceError> {
        if verify(&self.webhook_secret, body, signature) {
            Ok(())
        } else {
            metrics::counter!("salon_payments.signature_rejected", 1, "source" => "webhook");
            warn!(
                target: "security",
                body_len = body.len(),
                "webhook signature mismatch"
            );
            Err(ServiceError::SignatureInvalid)
        }
    }
}

fn payment_message(order_id: &str, payment_id: &str) -> String {
    format!("{}|{}", order_id, payment_id)
}

fn sign(secret: &str, message: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison via `Mac::verify_slice`
fn verify(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn signatures() -> GatewaySignatures {
        GatewaySignatures::new("key_secret_abc", "webhook_secret_xyz")
    }

    #[test]
    fn payment_signature_round_trips() {
        let sig = signatures().sign_payment("order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(signatures()
            .verify_payment_signature("order_1", "pay_1", &sig)
            .is_ok());
    }

    #[test]
    fn payment_signature_binds_both_ids() {
        let sig = signatures().sign_payment("order_1", "pay_1");
        assert_matches!(
            signatures().verify_payment_signature("order_1", "pay_2", &sig),
            Err(ServiceError::SignatureInvalid)
        );
        assert_matches!(
            signatures().verify_payment_signature("order_2", "pay_1", &sig),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn single_flipped_character_is_rejected() {
        let mut sig = signatures().sign_payment("order_1", "pay_1");
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });
        assert_matches!(
            signatures().verify_payment_signature("order_1", "pay_1", &sig),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        assert_matches!(
            signatures().verify_payment_signature("order_1", "pay_1", "not-hex"),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let body = br#"{"event":"payment.captured"}"#;
        let webhook_sig = signatures().sign_webhook(body);
        assert!(signatures().verify_webhook_signature(body, &webhook_sig).is_ok());

        let key_signed = sign("key_secret_abc", body);
        assert_matches!(
            signatures().verify_webhook_signature(body, &key_signed),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn webhook_signature_covers_exact_bytes() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = signatures().sign_webhook(body);
        let reformatted = br#"{ "event": "payment.captured" }"#;
        assert!(signatures().verify_webhook_signature(reformatted, &sig).is_err());
    }

    #[tokio::test]
    async fn bounded_maps_elapsed_deadline_to_gateway_unavailable() {
        let result: Result<(), ServiceError> = bounded(
            Duration::from_millis(10),
            "fetch_payment",
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        )
        .await;
        assert_matches!(result, Err(ServiceError::GatewayUnavailable(_)));
    }
}
