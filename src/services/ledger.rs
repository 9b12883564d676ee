//! Payment legs.
//!
//! Every status change is a conditional `UPDATE ... WHERE status IN (...)`.
//! The row count tells the caller whether it won. Combined with the row lock
//! taken by `lock_*` inside a [`UnitOfWork`](crate::db::unit_of_work::UnitOfWork)
//! and the partial unique indexes on successful legs, a leg can turn
//! `success` at most once.

use crate::{
    entities::{booking, payment, salon, PaymentStatus, PaymentType},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Gateway references recorded when a leg is settled online
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettlement {
    pub gateway_payment_id: String,
    pub gateway_signature: String,
    pub method: Option<String>,
}

/// Outcome of [`PaymentLedger::mark_leg_successful`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegSettlement {
    /// This call moved the leg to `success`
    Confirmed,
    /// Another caller got there first; nothing was written
    AlreadySuccessful,
}

/// Successful-payment totals over a period, minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevenueTotals {
    pub amount_minor: i64,
    pub payments: u64,
}

impl RevenueTotals {
    fn from_amounts(amounts: Vec<i64>) -> Self {
        Self {
            amount_minor: amounts.iter().sum(),
            payments: amounts.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentLedger;

impl PaymentLedger {
    /// Inserts a `pending` leg for a booking
    pub async fn create_booking_leg<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
        payment_type: PaymentType,
        amount_minor: i64,
        currency: &str,
    ) -> Result<payment::Model, ServiceError> {
        let leg = new_leg(payment_type, amount_minor, currency);
        payment::ActiveModel {
            booking_id: Set(Some(booking_id)),
            ..leg
        }
        .insert(conn)
        .await
        .map_err(|e| ServiceError::from_write(e, "payment leg already exists"))
    }

    /// Inserts a `pending` vendor registration leg
    pub async fn create_registration_leg<C: ConnectionTrait>(
        &self,
        conn: &C,
        vendor_request_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<payment::Model, ServiceError> {
        let leg = new_leg(PaymentType::VendorRegistration, amount_minor, currency);
        payment::ActiveModel {
            vendor_request_id: Set(Some(vendor_request_id)),
            ..leg
        }
        .insert(conn)
        .await
        .map_err(|e| ServiceError::from_write(e, "registration payment already exists"))
    }

    pub async fn find_by_order_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(order_id))
            .filter(payment::Column::DeletedAt.is_null())
            .one(conn)
            .await?)
    }

    /// `SELECT ... FOR UPDATE` on the leg carrying `order_id`
    pub async fn lock_by_order_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(order_id))
            .filter(payment::Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(conn)
            .await?)
    }

    pub async fn legs_for_booking<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Locks every live leg of a booking. Legs are always locked before their booking.
    pub async fn lock_legs_for_booking<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::Id)
            .lock_exclusive()
            .all(conn)
            .await?)
    }

    pub async fn find_leg<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
        payment_type: PaymentType,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .filter(payment::Column::PaymentType.eq(payment_type))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::CreatedAt)
            .one(conn)
            .await?)
    }

    pub async fn lock_leg<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
        payment_type: PaymentType,
    ) -> Result<payment::Model, ServiceError> {
        payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .filter(payment::Column::PaymentType.eq(payment_type))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::CreatedAt)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("{} leg of booking {}", payment_type, booking_id))
            })
    }

    pub async fn lock_registration_leg<C: ConnectionTrait>(
        &self,
        conn: &C,
        vendor_request_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::VendorRequestId.eq(vendor_request_id))
            .filter(payment::Column::PaymentType.eq(PaymentType::VendorRegistration))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::CreatedAt)
            .lock_exclusive()
            .one(conn)
            .await?)
    }

    /// Stores the gateway order id on a leg that has none yet.
    ///
    /// Returns `false` when the leg already carries an order or is settled.
    #[instrument(skip(self, conn))]
    pub async fn attach_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        leg_id: Uuid,
        order_id: &str,
    ) -> Result<bool, ServiceError> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::GatewayOrderId, Expr::value(order_id))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(leg_id))
            .filter(payment::Column::GatewayOrderId.is_null())
            .filter(payment::Column::Status.ne(PaymentStatus::Success))
            .exec(conn)
            .await
            .map_err(|e| ServiceError::from_write(e, "gateway order already attached"))?;
        Ok(result.rows_affected == 1)
    }

    /// The single place a gateway-paid leg turns `success`.
    ///
    /// Callers hold the leg's row lock. A leg that is already `success`
    /// is left untouched and reported as [`LegSettlement::AlreadySuccessful`].
    /// A `failed` leg may still succeed, since the gateway allows retries on an order.
    #[instrument(skip(self, conn, settlement), fields(leg_id = %leg_id))]
    pub async fn mark_leg_successful<C: ConnectionTrait>(
        &self,
        conn: &C,
        leg_id: Uuid,
        settlement: &GatewaySettlement,
    ) -> Result<LegSettlement, ServiceError> {
        let now = Utc::now();
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Success))
            .col_expr(
                payment::Column::GatewayPaymentId,
                Expr::value(settlement.gateway_payment_id.clone()),
            )
            .col_expr(
                payment::Column::GatewaySignature,
                Expr::value(settlement.gateway_signature.clone()),
            )
            .col_expr(
                payment::Column::Method,
                Expr::value(
                    settlement
                        .method
                        .clone()
                        .unwrap_or_else(|| "online".to_string()),
                ),
            )
            .col_expr(payment::Column::FailureReason, Expr::value(Option::<String>::None))
            .col_expr(payment::Column::PaidAt, Expr::value(now))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(leg_id))
            .filter(payment::Column::Status.is_in([PaymentStatus::Pending, PaymentStatus::Failed]))
            .filter(payment::Column::DeletedAt.is_null())
            .exec(conn)
            .await
            .map_err(|e| ServiceError::from_write(e, "payment already recorded"))?;

        if result.rows_affected == 1 {
            Ok(LegSettlement::Confirmed)
        } else {
            debug!("leg already settled");
            Ok(LegSettlement::AlreadySuccessful)
        }
    }

    /// Moves a `pending` leg to `failed`. Returns whether anything changed.
    pub async fn mark_leg_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        leg_id: Uuid,
        reason: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(
                payment::Column::FailureReason,
                Expr::value(reason.map(str::to_string)),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(leg_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Settles the pay-at-salon leg with money collected in person.
    ///
    /// The collected amount replaces the quoted service price on the leg.
    #[instrument(skip(self, conn, leg), fields(leg_id = %leg.id))]
    pub async fn settle_manual<C: ConnectionTrait>(
        &self,
        conn: &C,
        leg: &payment::Model,
        amount_minor: i64,
        method: &str,
        recorded_by: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        if leg.payment_type != PaymentType::ServicePayment {
            return Err(ServiceError::InvalidRequest(format!(
                "{} legs cannot be settled in person",
                leg.payment_type
            )));
        }
        if leg.is_settled() {
            return Err(ServiceError::Conflict(
                "service payment already recorded".to_string(),
            ));
        }
        if amount_minor <= 0 {
            return Err(ServiceError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Success))
            .col_expr(payment::Column::AmountMinor, Expr::value(amount_minor))
            .col_expr(payment::Column::Method, Expr::value(method.to_string()))
            .col_expr(payment::Column::RecordedBy, Expr::value(Some(recorded_by)))
            .col_expr(payment::Column::PaidAt, Expr::value(now))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(leg.id))
            .filter(payment::Column::Status.ne(PaymentStatus::Success))
            .exec(conn)
            .await
            .map_err(|e| ServiceError::from_write(e, "service payment already recorded"))?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "service payment already recorded".to_string(),
            ));
        }

        payment::Entity::find_by_id(leg.id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("payment", leg.id))
    }

    /// Fails every open leg of a cancelled booking so no late order can settle it
    pub async fn void_pending_legs<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(
                payment::Column::FailureReason,
                Expr::value(Some("booking cancelled".to_string())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::BookingId.eq(booking_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Open legs on a salon's bookings, oldest first
    pub async fn pending_for_salon<C: ConnectionTrait>(
        &self,
        conn: &C,
        salon_id: Uuid,
    ) -> Result<Vec<(payment::Model, booking::Model)>, ServiceError> {
        let rows = payment::Entity::find()
            .find_also_related(booking::Entity)
            .filter(booking::Column::SalonId.eq(salon_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .filter(payment::Column::DeletedAt.is_null())
            .order_by_asc(payment::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(leg, booking)| booking.map(|booking| (leg, booking)))
            .collect())
    }

    /// Platform revenue: successful legs of `payment_type` paid in `[from, to)`
    pub async fn platform_revenue<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_type: PaymentType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RevenueTotals, ServiceError> {
        let amounts: Vec<i64> = payment::Entity::find()
            .select_only()
            .column(payment::Column::AmountMinor)
            .filter(payment::Column::PaymentType.eq(payment_type))
            .filter(payment::Column::Status.eq(PaymentStatus::Success))
            .filter(payment::Column::DeletedAt.is_null())
            .filter(payment::Column::PaidAt.gte(from))
            .filter(payment::Column::PaidAt.lt(to))
            .into_tuple()
            .all(conn)
            .await?;
        Ok(RevenueTotals::from_amounts(amounts))
    }

    /// Vendor revenue: successful service payments on the vendor's salons paid in `[from, to)`
    pub async fn vendor_revenue<C: ConnectionTrait>(
        &self,
        conn: &C,
        vendor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RevenueTotals, ServiceError> {
        let salon_ids: Vec<Uuid> = salon::Entity::find()
            .select_only()
            .column(salon::Column::Id)
            .filter(salon::Column::VendorId.eq(vendor_id))
            .into_tuple()
            .all(conn)
            .await?;
        if salon_ids.is_empty() {
            return Ok(RevenueTotals::default());
        }

        let amounts: Vec<i64> = payment::Entity::find()
            .select_only()
            .column(payment::Column::AmountMinor)
            .inner_join(booking::Entity)
            .filter(booking::Column::SalonId.is_in(salon_ids))
            .filter(payment::Column::PaymentType.eq(PaymentType::ServicePayment))
            .filter(payment::Column::Status.eq(PaymentStatus::Success))
            .filter(payment::Column::DeletedAt.is_null())
            .filter(payment::Column::PaidAt.gte(from))
            .filter(payment::Column::PaidAt.lt(to))
            .into_tuple()
            .all(conn)
            .await?;
        Ok(RevenueTotals::from_amounts(amounts))
    }
}

fn new_leg(payment_type: PaymentType, amount_minor: i64, currency: &str) -> payment::ActiveModel {
    let now = Utc::now();
    payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        booking_id: Set(None),
        vendor_request_id: Set(None),
        payment_type: Set(payment_type),
        amount_minor: Set(amount_minor),
        currency: Set(currency.to_string()),
        gateway_order_id: Set(None),
        gateway_payment_id: Set(None),
        gateway_signature: Set(None),
        status: Set(PaymentStatus::Pending),
        method: Set(None),
        recorded_by: Set(None),
        failure_reason: Set(None),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    }
}
