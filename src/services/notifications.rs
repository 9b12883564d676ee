use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeKind {
    BookingCreated,
    BookingConfirmed,
    PaymentReceipt,
    BookingCancelled,
    BookingCompleted,
    SalonActivated,
}

/// Payload handed to the notification service (email / SMS templates live there)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingNotice {
    pub kind: NoticeKind,
    pub recipient_id: Uuid,
    pub salon_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub currency: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound customer/vendor messaging. Delivery is best effort: a failure is
/// logged by the caller and never undoes the business operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &BookingNotice) -> Result<(), NotificationError>;
}

/// Sends a notice and swallows the outcome
pub async fn deliver(notifier: &dyn Notifier, notice: BookingNotice) {
    let kind = notice.kind;
    match notifier.notify(&notice).await {
        Ok(()) => counter!("salon_notifications.sent", 1, "kind" => kind.to_string()),
        Err(e) => {
            counter!("salon_notifications.failed", 1, "kind" => kind.to_string());
            warn!(%kind, recipient_id = %notice.recipient_id, error = %e, "notification not delivered");
        }
    }
}

/// Writes notices to the log. Used when no notification service is configured.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: &BookingNotice) -> Result<(), NotificationError> {
        info!(
            kind = %notice.kind,
            recipient_id = %notice.recipient_id,
            booking_number = notice.booking_number.as_deref().unwrap_or("-"),
            "notification"
        );
        Ok(())
    }
}

/// Posts notices as JSON to the notification service, in the background with retries
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            max_retries: 3,
        })
    }

    #[instrument(skip(self, notice), fields(kind = %notice.kind))]
    async fn post_with_retry(&self, notice: &BookingNotice) -> Result<(), NotificationError> {
        for attempt in 1..=self.max_retries {
            match self.client.post(&self.url).json(notice).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => warn!(
                    "Notification delivery failed with status: {} (attempt {}/{})",
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Notification delivery error: {} (attempt {}/{})",
                    e, attempt, self.max_retries
                ),
            }

            // Exponential backoff: 1s, 2s, 4s
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt - 1))).await;
            }
        }

        Err(NotificationError::Delivery(format!(
            "gave up after {} attempts",
            self.max_retries
        )))
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notice: &BookingNotice) -> Result<(), NotificationError> {
        let this = self.clone();
        let notice = notice.clone();
        tokio::spawn(async move {
            if let Err(e) = this.post_with_retry(&notice).await {
                counter!("salon_notifications.failed", 1, "kind" => notice.kind.to_string());
                error!(recipient_id = %notice.recipient_id, error = %e, "notification dropped");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingNotifier {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notice: &BookingNotice) -> Result<(), NotificationError> {
            *self.calls.lock().unwrap() += 1;
            Err(NotificationError::Delivery("smtp down".into()))
        }
    }

    fn notice() -> BookingNotice {
        BookingNotice {
            kind: NoticeKind::BookingCancelled,
            recipient_id: Uuid::new_v4(),
            salon_id: Uuid::new_v4(),
            booking_id: Some(Uuid::new_v4()),
            booking_number: Some("BK202503010042".into()),
            booking_date: None,
            booking_time: None,
            amount: None,
            reason: Some("schedule change".into()),
            currency: "INR".into(),
        }
    }

    #[tokio::test]
    async fn deliver_swallows_failures() {
        let notifier = FailingNotifier {
            calls: Mutex::new(0),
        };
        deliver(&notifier, notice()).await;
        assert_eq!(*notifier.calls.lock().unwrap(), 1);
    }

    #[test]
    fn notice_serializes_without_empty_fields() {
        let json = serde_json::to_value(notice()).unwrap();
        assert_eq!(json["kind"], "booking_cancelled");
        assert!(json.get("amount").is_none());
    }
}
