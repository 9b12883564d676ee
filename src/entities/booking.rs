use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a booking.
///
/// `completed` and `cancelled` are terminal. `payment_failed` only leaves
/// through a later successful convenience-fee confirmation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
}

impl BookingStatus {
    /// Statuses a booking may move to `self` from.
    pub fn allowed_predecessors(self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[],
            BookingStatus::Confirmed => &[BookingStatus::Pending, BookingStatus::PaymentFailed],
            BookingStatus::Completed => &[BookingStatus::Confirmed],
            BookingStatus::Cancelled => &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::PaymentFailed => &[BookingStatus::Pending],
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

/// How the booking's fee was priced
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PricingMode {
    /// Flat convenience fee percent on the service price
    #[default]
    #[sea_orm(string_value = "standard")]
    Standard,
    /// Booking fee percent plus GST on that fee
    #[sea_orm(string_value = "cart_checkout")]
    CartCheckout,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Display identifier, `BK` + date + 4 digits. Not guaranteed unique.
    pub booking_number: String,
    pub customer_id: Uuid,
    pub salon_id: Uuid,
    pub booking_date: NaiveDate,
    /// Primary slot, `HH:MM`
    pub booking_time: String,
    /// Every slot the customer asked for, primary first
    pub requested_slots: Json,
    pub service_price_minor: i64,
    pub convenience_fee_minor: i64,
    pub total_amount_minor: i64,
    pub currency: String,
    pub pricing_mode: PricingMode,
    pub status: BookingStatus,
    pub service_paid: bool,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn requested_slots(&self) -> Vec<String> {
        serde_json::from_value(self.requested_slots.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::salon::Entity",
        from = "Column::SalonId",
        to = "super::salon::Column::Id"
    )]
    Salon,
    #[sea_orm(has_many = "super::booking_service::Entity")]
    BookingService,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payment,
}

impl Related<super::salon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Salon.def()
    }
}

impl Related<super::booking_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BookingService.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = sea_orm::ActiveValue::Set(Utc::now());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_is_reachable_from_pending_and_failed_payment() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(BookingStatus::PaymentFailed.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Confirmed));
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for next in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::PaymentFailed,
        ] {
            assert!(!BookingStatus::Completed.can_transition_to(next));
            assert!(!BookingStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn only_confirmed_bookings_complete() {
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Completed));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Completed));
        assert!(!BookingStatus::PaymentFailed.can_transition_to(BookingStatus::Completed));
    }

    #[test]
    fn payment_failed_cannot_be_cancelled_directly() {
        assert!(!BookingStatus::PaymentFailed.can_transition_to(BookingStatus::Cancelled));
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Cancelled));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Cancelled));
    }

    #[test]
    fn status_renders_as_snake_case() {
        assert_eq!(BookingStatus::PaymentFailed.to_string(), "payment_failed");
        assert_eq!(PricingMode::CartCheckout.to_string(), "cart_checkout");
    }
}
