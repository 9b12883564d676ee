use super::{
    GatewayOrder, GatewayPayment, GatewayRefund, OrderRequest, PaymentGateway, RefundRequest,
};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use metrics::counter;
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct CaptureBody<'a> {
    amount: i64,
    currency: &'a str,
}

/// REST client for the gateway, authenticated with basic auth (key id / key secret)
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.gateway_base_url.clone(),
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
            config.gateway_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, ServiceError> {
        let response = request
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| {
                counter!("salon_gateway.errors", 1, "operation" => operation);
                warn!(operation, error = %e, timeout = e.is_timeout(), "gateway request failed");
                ServiceError::GatewayUnavailable(format!("{}: {}", operation, e))
            })?;

        let status = response.status();
        if status.is_success() {
            counter!("salon_gateway.requests", 1, "operation" => operation);
            return response.json::<T>().await.map_err(|e| {
                error!(operation, error = %e, "gateway returned an unreadable body");
                ServiceError::GatewayUnavailable(format!("{}: unreadable response", operation))
            });
        }

        counter!("salon_gateway.errors", 1, "operation" => operation);
        let body = response.text().await.unwrap_or_default();
        let (code, description) = match serde_json::from_str::<GatewayErrorBody>(&body) {
            Ok(parsed) => (
                parsed.error.code.unwrap_or_default(),
                parsed.error.description.unwrap_or_default(),
            ),
            Err(_) => (String::new(), body),
        };

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(operation, %status, %code, "gateway unavailable");
            Err(ServiceError::GatewayUnavailable(format!(
                "{} returned {}",
                operation, status
            )))
        } else {
            warn!(operation, %status, %code, %description, "gateway rejected request");
            Err(ServiceError::InvalidRequest(format!(
                "payment gateway rejected {}: {}",
                operation, description
            )))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = request.amount))]
    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder, ServiceError> {
        let order: GatewayOrder = self
            .send(
                self.client.post(self.url("/v1/orders")).json(&request),
                "create_order",
            )
            .await?;
        debug!(order_id = %order.id, "gateway order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        self.send(
            self.client
                .get(self.url(&format!("/v1/payments/{}", payment_id))),
            "fetch_payment",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn capture_payment(
        &self,
        payment_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayPayment, ServiceError> {
        self.send(
            self.client
                .post(self.url(&format!("/v1/payments/{}/capture", payment_id)))
                .json(&CaptureBody { amount, currency }),
            "capture_payment",
        )
        .await
    }

    #[instrument(skip(self, request), fields(amount = request.amount, receipt = %request.receipt))]
    async fn refund_payment(
        &self,
        payment_id: &str,
        request: RefundRequest,
    ) -> Result<GatewayRefund, ServiceError> {
        self.send(
            self.client
                .post(self.url(&format!("/v1/payments/{}/refund", payment_id)))
                .json(&request),
            "refund_payment",
        )
        .await
    }
}
