use crate::{
    entities::{payment, refund, RefundStatus},
    errors::ServiceError,
    services::fees::from_minor,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<refund::Model> for RefundResponse {
    fn from(model: refund::Model) -> Self {
        Self {
            id: model.id,
            booking_id: model.booking_id,
            payment_id: model.payment_id,
            amount: from_minor(model.amount_minor),
            currency: model.currency,
            status: model.status,
            gateway_refund_id: model.gateway_refund_id,
            attempts: model.attempts,
            last_error: model.last_error,
            processed_at: model.processed_at,
        }
    }
}

/// Local record of every refund owed, written before the gateway is called
#[derive(Debug, Clone, Copy, Default)]
pub struct RefundLedger;

impl RefundLedger {
    /// Opens the refund for a captured leg, or returns the one that already exists.
    ///
    /// The unique index on `payment_id` means a leg is never refunded twice.
    #[instrument(skip(self, conn, leg), fields(payment_id = %leg.id))]
    pub async fn open<C: ConnectionTrait>(
        &self,
        conn: &C,
        booking_id: Uuid,
        leg: &payment::Model,
    ) -> Result<refund::Model, ServiceError> {
        if let Some(existing) = self.for_payment(conn, leg.id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let model = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(leg.id),
            booking_id: Set(booking_id),
            amount_minor: Set(leg.amount_minor),
            currency: Set(leg.currency.clone()),
            status: Set(RefundStatus::Pending),
            gateway_refund_id: Set(None),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            processed_at: Set(None),
        }
        .insert(conn)
        .await
        .map_err(|e| ServiceError::from_write(e, "refund already recorded"))?;

        info!(refund_id = %model.id, amount_minor = model.amount_minor, "refund opened");
        Ok(model)
    }

    pub async fn for_payment<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_id: Uuid,
    ) -> Result<Option<refund::Model>, ServiceError> {
        Ok(refund::Entity::find()
            .filter(refund::Column::PaymentId.eq(payment_id))
            .one(conn)
            .await?)
    }

    pub async fn mark_processed<C: ConnectionTrait>(
        &self,
        conn: &C,
        refund_id: Uuid,
        gateway_refund_id: &str,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let result = refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(RefundStatus::Processed))
            .col_expr(
                refund::Column::GatewayRefundId,
                Expr::value(gateway_refund_id.to_string()),
            )
            .col_expr(
                refund::Column::Attempts,
                Expr::col(refund::Column::Attempts).add(1),
            )
            .col_expr(refund::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(refund::Column::ProcessedAt, Expr::value(now))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.ne(RefundStatus::Processed))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn mark_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        refund_id: Uuid,
        error: &str,
    ) -> Result<(), ServiceError> {
        refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(RefundStatus::Failed))
            .col_expr(
                refund::Column::Attempts,
                Expr::col(refund::Column::Attempts).add(1),
            )
            .col_expr(refund::Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(refund::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.ne(RefundStatus::Processed))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Takes a retry candidate for this caller. The update only matches the
    /// row as it was read, so of two concurrent retries exactly one gets it.
    /// The claimed row is `pending` with a fresh `updated_at`, which keeps it
    /// out of `retryable` until the grace period passes again.
    pub async fn claim<C: ConnectionTrait>(
        &self,
        conn: &C,
        observed: &refund::Model,
    ) -> Result<Option<refund::Model>, ServiceError> {
        let now = Utc::now();
        let result = refund::Entity::update_many()
            .col_expr(refund::Column::Status, Expr::value(RefundStatus::Pending))
            .col_expr(refund::Column::UpdatedAt, Expr::value(now))
            .filter(refund::Column::Id.eq(observed.id))
            .filter(refund::Column::Status.eq(observed.status))
            .filter(refund::Column::UpdatedAt.eq(observed.updated_at))
            .exec(conn)
            .await?;
        if result.rows_affected != 1 {
            debug!(refund_id = %observed.id, "refund claimed elsewhere");
            return Ok(None);
        }
        Ok(Some(refund::Model {
            status: RefundStatus::Pending,
            updated_at: now,
            ..observed.clone()
        }))
    }

    /// Unprocessed refunds that still have attempts left, oldest first.
    ///
    /// `pending` rows only qualify once untouched since `stale_before`: a
    /// crash between commit and the gateway call leaves one behind, while a
    /// fresh one may still have its first call in flight.
    pub async fn retryable<C: ConnectionTrait>(
        &self,
        conn: &C,
        max_attempts: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<refund::Model>, ServiceError> {
        Ok(refund::Entity::find()
            .filter(
                Condition::any()
                    .add(refund::Column::Status.eq(RefundStatus::Failed))
                    .add(
                        Condition::all()
                            .add(refund::Column::Status.eq(RefundStatus::Pending))
                            .add(refund::Column::UpdatedAt.lt(stale_before)),
                    ),
            )
            .filter(refund::Column::Attempts.lt(max_attempts))
            .order_by_asc(refund::Column::CreatedAt)
            .all(conn)
            .await?)
    }
}
