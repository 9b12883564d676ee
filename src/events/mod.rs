use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::PaymentType;

/// Domain events published after a unit of work commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking_id: Uuid,
        salon_id: Uuid,
        total_amount_minor: i64,
    },
    BookingConfirmed {
        booking_id: Uuid,
        confirmed_at: DateTime<Utc>,
    },
    BookingCompleted(Uuid),
    BookingCancelled {
        booking_id: Uuid,
        reason: Option<String>,
    },
    PaymentCaptured {
        payment_id: Uuid,
        payment_type: PaymentType,
        amount_minor: i64,
    },
    PaymentFailed {
        payment_id: Uuid,
        payment_type: PaymentType,
        reason: Option<String>,
    },
    RefundIssued {
        refund_id: Uuid,
        booking_id: Uuid,
        amount_minor: i64,
    },
    RefundFailed {
        refund_id: Uuid,
        booking_id: Uuid,
        error: String,
    },
    SalonActivated {
        salon_id: Uuid,
        vendor_request_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BookingCreated { .. } => "booking_created",
            Event::BookingConfirmed { .. } => "booking_confirmed",
            Event::BookingCompleted(_) => "booking_completed",
            Event::BookingCancelled { .. } => "booking_cancelled",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::RefundIssued { .. } => "refund_issued",
            Event::RefundFailed { .. } => "refund_failed",
            Event::SalonActivated { .. } => "salon_activated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes without waiting for channel capacity; a full or closed channel drops the event
    pub fn emit(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.sender.try_send(event) {
            counter!("salon_events.dropped", 1, "event" => name);
            warn!(event = name, error = %e, "dropping domain event");
        }
    }
}

/// Drains the event channel, logging every event and counting it by kind
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("salon_events.processed", 1, "event" => event.name());
        match &event {
            Event::PaymentFailed {
                payment_id, reason, ..
            } => {
                warn!(%payment_id, reason = ?reason, "payment failed");
            }
            Event::RefundFailed {
                refund_id,
                booking_id,
                error: refund_error,
            } => {
                error!(%refund_id, %booking_id, error = %refund_error, "refund needs attention");
            }
            other => {
                info!(event = other.name(), payload = ?other, "domain event");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_drops_when_channel_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let booking_id = Uuid::new_v4();

        sender.emit(Event::BookingCompleted(booking_id));
        sender.emit(Event::BookingCompleted(Uuid::new_v4()));

        assert_eq!(rx.recv().await, Some(Event::BookingCompleted(booking_id)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn event_names_are_stable() {
        let event = Event::RefundIssued {
            refund_id: Uuid::nil(),
            booking_id: Uuid::nil(),
            amount_minor: 6_000,
        };
        assert_eq!(event.name(), "refund_issued");
    }
}
