use crate::{
    entities::{
        booking::{self, BookingStatus, PricingMode},
        booking_service, payment, PaymentStatus, PaymentType,
    },
    errors::ServiceError,
    services::{
        catalog::ResolvedItem,
        fees::{from_minor, FeeBreakdown},
    },
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Most alternate slots a customer may propose besides the primary time
pub const MAX_REQUESTED_SLOTS: usize = 3;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct BookingItemRequest {
    pub service_id: Uuid,
    #[validate(range(min = 1, max = 20, message = "Quantity must be between 1 and 20"))]
    pub quantity: u32,
}

/// Reference to a payment the customer already completed with the gateway
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentProof {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "Payment id is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    pub salon_id: Uuid,
    #[validate(length(min = 1, message = "At least one service is required"))]
    pub services: Vec<BookingItemRequest>,
    pub booking_date: NaiveDate,
    /// Primary slot, `HH:MM`
    pub booking_time: String,
    /// Fallback slots, `HH:MM`
    #[serde(default)]
    pub alternate_slots: Vec<String>,
    #[serde(default)]
    pub pricing_mode: PricingMode,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
    pub payment_proof: Option<PaymentProof>,
}

impl CreateBookingRequest {
    /// Primary slot first, then the alternates, each normalized to `HH:MM`
    pub fn requested_slots(&self) -> Result<Vec<String>, ServiceError> {
        if self.alternate_slots.len() > MAX_REQUESTED_SLOTS {
            return Err(ServiceError::InvalidRequest(format!(
                "at most {} alternate time slots may be requested",
                MAX_REQUESTED_SLOTS
            )));
        }
        std::iter::once(&self.booking_time)
            .chain(self.alternate_slots.iter())
            .map(|slot| parse_slot(slot))
            .collect()
    }

    pub fn line_items(&self) -> Vec<(Uuid, u32)> {
        self.services
            .iter()
            .map(|item| (item.service_id, item.quantity))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuoteRequest {
    pub salon_id: Uuid,
    #[validate(length(min = 1, message = "At least one service is required"))]
    pub services: Vec<BookingItemRequest>,
    #[serde(default)]
    pub pricing_mode: PricingMode,
}

fn parse_slot(slot: &str) -> Result<String, ServiceError> {
    NaiveTime::parse_from_str(slot.trim(), "%H:%M")
        .map(|time| time.format("%H:%M").to_string())
        .map_err(|_| ServiceError::InvalidRequest(format!("time slot {:?} is not HH:MM", slot)))
}

/// `BK` + booking date + 4 random digits. Collisions are possible and tolerated;
/// the booking id is the real key.
pub fn generate_booking_number(date: NaiveDate) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("BK{}{:04}", date.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingResponse {
    pub id: Uuid,
    pub booking_number: String,
    pub customer_id: Uuid,
    pub salon_id: Uuid,
    pub booking_date: NaiveDate,
    pub booking_time: String,
    pub requested_slots: Vec<String>,
    pub status: BookingStatus,
    pub pricing_mode: PricingMode,
    pub service_price: Decimal,
    pub convenience_fee: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub service_paid: bool,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<booking::Model> for BookingResponse {
    fn from(model: booking::Model) -> Self {
        let requested_slots = model.requested_slots();
        Self {
            id: model.id,
            booking_number: model.booking_number,
            customer_id: model.customer_id,
            salon_id: model.salon_id,
            booking_date: model.booking_date,
            booking_time: model.booking_time,
            requested_slots,
            status: model.status,
            pricing_mode: model.pricing_mode,
            service_price: from_minor(model.service_price_minor),
            convenience_fee: from_minor(model.convenience_fee_minor),
            total_amount: from_minor(model.total_amount_minor),
            currency: model.currency,
            service_paid: model.service_paid,
            cancellation_reason: model.cancellation_reason,
            notes: model.notes,
            created_at: model.created_at,
            confirmed_at: model.confirmed_at,
            completed_at: model.completed_at,
            cancelled_at: model.cancelled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingItemResponse {
    pub service_id: Uuid,
    pub service_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub duration_minutes: i32,
}

impl From<booking_service::Model> for BookingItemResponse {
    fn from(model: booking_service::Model) -> Self {
        Self {
            service_id: model.service_id,
            service_name: model.service_name,
            quantity: model.quantity,
            unit_price: from_minor(model.unit_price_minor),
            line_total: from_minor(model.line_total_minor),
            duration_minutes: model.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentLegResponse {
    pub id: Uuid,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentLegResponse {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            payment_type: model.payment_type,
            status: model.status,
            amount: from_minor(model.amount_minor),
            currency: model.currency,
            gateway_order_id: model.gateway_order_id,
            gateway_payment_id: model.gateway_payment_id,
            method: model.method,
            paid_at: model.paid_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: BookingResponse,
    pub items: Vec<BookingItemResponse>,
    pub payments: Vec<PaymentLegResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookingFilters {
    pub customer_id: Option<Uuid>,
    pub salon_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    /// Earliest booking date, inclusive
    pub from_date: Option<NaiveDate>,
    /// Latest booking date, inclusive
    pub to_date: Option<NaiveDate>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingListResponse {
    pub bookings: Vec<BookingResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Which bookings a caller may list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    All,
    Customer(Uuid),
    Salons(Vec<Uuid>),
}

/// Values for a new booking row, already priced
#[derive(Debug, Clone)]
pub struct NewBooking<'a> {
    pub customer_id: Uuid,
    pub salon_id: Uuid,
    pub booking_date: NaiveDate,
    pub requested_slots: Vec<String>,
    pub pricing_mode: PricingMode,
    pub fees: FeeBreakdown,
    pub currency: &'a str,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub items: &'a [ResolvedItem],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BookingStore;

impl BookingStore {
    /// Writes the booking and its line items. Payment legs are seeded by the caller.
    #[instrument(skip(self, conn, new), fields(salon_id = %new.salon_id, customer_id = %new.customer_id))]
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        new: NewBooking<'_>,
    ) -> Result<booking::Model, ServiceError> {
        let primary_slot = new
            .requested_slots
            .first()
            .cloned()
            .ok_or_else(|| ServiceError::InvalidRequest("a time slot is required".to_string()))?;
        let now = Utc::now();
        let booking_id = Uuid::new_v4();

        let model = booking::ActiveModel {
            id: Set(booking_id),
            booking_number: Set(generate_booking_number(new.booking_date)),
            customer_id: Set(new.customer_id),
            salon_id: Set(new.salon_id),
            booking_date: Set(new.booking_date),
            booking_time: Set(primary_slot),
            requested_slots: Set(serde_json::to_value(&new.requested_slots)?),
            service_price_minor: Set(new.fees.service_price_minor),
            convenience_fee_minor: Set(new.fees.convenience_fee_minor),
            total_amount_minor: Set(new.fees.total_minor),
            currency: Set(new.currency.to_string()),
            pricing_mode: Set(new.pricing_mode),
            status: Set(new.status),
            service_paid: Set(false),
            cancellation_reason: Set(None),
            notes: Set(new.notes),
            created_at: Set(now),
            updated_at: Set(now),
            confirmed_at: Set((new.status == BookingStatus::Confirmed).then_some(now)),
            completed_at: Set(None),
            cancelled_at: Set(None),
        }
        .insert(conn)
        .await?;

        let lines: Vec<booking_service::ActiveModel> = new
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let quantity = i64::from(item.quantity);
                booking_service::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    booking_id: Set(booking_id),
                    service_id: Set(item.service.id),
                    service_name: Set(item.service.name.clone()),
                    quantity: Set(item.quantity as i32),
                    unit_price_minor: Set(item.service.price_minor),
                    line_total_minor: Set(item.service.price_minor * quantity),
                    duration_minutes: Set(item.service.duration_minutes),
                    position: Set(position as i32),
                }
            })
            .collect();
        booking_service::Entity::insert_many(lines)
            .exec_without_returning(conn)
            .await?;

        info!(booking_id = %model.id, booking_number = %model.booking_number, status = %model.status, "booking created");
        Ok(model)
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<booking::Model, ServiceError> {
        booking::Entity::find_by_id(booking_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("booking", booking_id))
    }

    /// Reads the booking with `FOR UPDATE`
    pub async fn lock<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<booking::Model, ServiceError> {
        booking::Entity::find_by_id(booking_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("booking", booking_id))
    }

    pub async fn items<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<Vec<booking_service::Model>, ServiceError> {
        Ok(booking_service::Entity::find()
            .filter(booking_service::Column::BookingId.eq(booking_id))
            .order_by_asc(booking_service::Column::Position)
            .all(conn)
            .await?)
    }

    #[instrument(skip(self, conn))]
    pub async fn list<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: ListScope,
        filters: &BookingFilters,
    ) -> Result<BookingListResponse, ServiceError> {
        let page = filters.page.unwrap_or(1).max(1);
        let per_page = filters
            .per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut query = booking::Entity::find();
        match scope {
            ListScope::All => {}
            ListScope::Customer(customer_id) => {
                query = query.filter(booking::Column::CustomerId.eq(customer_id));
            }
            ListScope::Salons(salon_ids) => {
                if salon_ids.is_empty() {
                    return Ok(BookingListResponse {
                        bookings: Vec::new(),
                        total: 0,
                        page,
                        per_page,
                    });
                }
                query = query.filter(booking::Column::SalonId.is_in(salon_ids));
            }
        }
        if let Some(customer_id) = filters.customer_id {
            query = query.filter(booking::Column::CustomerId.eq(customer_id));
        }
        if let Some(salon_id) = filters.salon_id {
            query = query.filter(booking::Column::SalonId.eq(salon_id));
        }
        if let Some(status) = filters.status {
            query = query.filter(booking::Column::Status.eq(status));
        }
        if let Some(from) = filters.from_date {
            query = query.filter(booking::Column::BookingDate.gte(from));
        }
        if let Some(to) = filters.to_date {
            query = query.filter(booking::Column::BookingDate.lte(to));
        }

        let paginator = query
            .order_by_desc(booking::Column::BookingDate)
            .order_by_desc(booking::Column::CreatedAt)
            .paginate(conn, per_page);
        let total = paginator.num_items().await?;
        let bookings = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(BookingResponse::from)
            .collect();

        Ok(BookingListResponse {
            bookings,
            total,
            page,
            per_page,
        })
    }

    /// Guarded status change: the row only moves if its current status is an
    /// allowed predecessor of `next`, checked by the `UPDATE` itself.
    #[instrument(skip(self, conn, booking), fields(booking_id = %booking.id, from = %booking.status, to = %next))]
    pub async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking: &booking::Model,
        next: BookingStatus,
        reason: Option<&str>,
    ) -> Result<booking::Model, ServiceError> {
        let now = Utc::now();
        let mut update = booking::Entity::update_many()
            .col_expr(booking::Column::Status, Expr::value(next))
            .col_expr(booking::Column::UpdatedAt, Expr::value(now));
        update = match next {
            BookingStatus::Confirmed => {
                update.col_expr(booking::Column::ConfirmedAt, Expr::value(now))
            }
            BookingStatus::Completed => update
                .col_expr(booking::Column::CompletedAt, Expr::value(now))
                .col_expr(booking::Column::ServicePaid, Expr::value(true)),
            BookingStatus::Cancelled => update
                .col_expr(booking::Column::CancelledAt, Expr::value(now))
                .col_expr(
                    booking::Column::CancellationReason,
                    Expr::value(reason.map(str::to_string)),
                ),
            BookingStatus::Pending | BookingStatus::PaymentFailed => update,
        };

        let result = update
            .filter(booking::Column::Id.eq(booking.id))
            .filter(booking::Column::Status.is_in(next.allowed_predecessors().iter().copied()))
            .exec(conn)
            .await?;

        let current = self.find(conn, booking.id).await?;
        if result.rows_affected == 0 {
            warn!(current = %current.status, "booking transition rejected");
            return Err(ServiceError::InvalidRequest(format!(
                "booking is {} and cannot become {}",
                current.status, next
            )));
        }
        Ok(current)
    }

    pub async fn mark_service_paid<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<(), ServiceError> {
        booking::Entity::update_many()
            .col_expr(booking::Column::ServicePaid, Expr::value(true))
            .col_expr(booking::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(booking::Column::Id.eq(booking_id))
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(primary: &str, alternates: &[&str]) -> CreateBookingRequest {
        CreateBookingRequest {
            salon_id: Uuid::new_v4(),
            services: vec![BookingItemRequest {
                service_id: Uuid::new_v4(),
                quantity: 1,
            }],
            booking_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            booking_time: primary.to_string(),
            alternate_slots: alternates.iter().map(|s| s.to_string()).collect(),
            pricing_mode: PricingMode::Standard,
            notes: None,
            payment_proof: None,
        }
    }

    #[test]
    fn booking_number_format() {
        let number = generate_booking_number(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(number.len(), 14);
        assert!(number.starts_with("BK20250301"));
        assert!(number[10..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn slots_are_normalized_primary_first() {
        let slots = request("9:30", &["14:00"]).requested_slots().unwrap();
        assert_eq!(slots, vec!["09:30".to_string(), "14:00".to_string()]);
    }

    #[test]
    fn more_than_three_alternates_is_rejected() {
        assert_matches!(
            request("09:00", &["10:00", "11:00", "12:00", "13:00"]).requested_slots(),
            Err(ServiceError::InvalidRequest(_))
        );
        let slots = request("09:00", &["10:00", "11:00", "12:00"])
            .requested_slots()
            .unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], "09:00");
    }

    #[test]
    fn malformed_slot_is_rejected() {
        assert_matches!(
            request("25:00", &[]).requested_slots(),
            Err(ServiceError::InvalidRequest(_))
        );
    }

    #[test]
    fn create_request_requires_a_service() {
        let mut req = request("09:00", &[]);
        req.services.clear();
        assert!(req.validate().is_err());
    }
}
