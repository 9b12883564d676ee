use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Payments::BookingId).uuid().null())
                    .col(ColumnDef::new(Payments::VendorRequestId).uuid().null())
                    .col(ColumnDef::new(Payments::PaymentType).string().not_null())
                    .col(ColumnDef::new(Payments::AmountMinor).big_integer().not_null())
                    .col(
                        ColumnDef::new(Payments::Currency)
                            .string_len(3)
                            .not_null()
                            .default("INR"),
                    )
                    .col(ColumnDef::new(Payments::GatewayOrderId).string().null())
                    .col(ColumnDef::new(Payments::GatewayPaymentId).string().null())
                    .col(ColumnDef::new(Payments::GatewaySignature).string().null())
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Payments::Method).string().null())
                    .col(ColumnDef::new(Payments::RecordedBy).uuid().null())
                    .col(ColumnDef::new(Payments::FailureReason).text().null())
                    .col(
                        ColumnDef::new(Payments::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_booking")
                            .from(Payments::Table, Payments::BookingId)
                            .to(Bookings::Table, Bookings::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_vendor_request")
                            .from(Payments::Table, Payments::VendorRequestId)
                            .to(VendorRequests::Table, VendorRequests::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_booking_id")
                    .table(Payments::Table)
                    .col(Payments::BookingId)
                    .to_owned(),
            )
            .await?;

        // Webhooks and client callbacks resolve legs by gateway order id
        manager
            .create_index(
                Index::create()
                    .name("uq_payments_gateway_order_id")
                    .table(Payments::Table)
                    .col(Payments::GatewayOrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_status_paid_at")
                    .table(Payments::Table)
                    .col(Payments::Status)
                    .col(Payments::PaidAt)
                    .to_owned(),
            )
            .await?;

        // At most one live successful leg per (booking, type) and per vendor request.
        // Partial indexes are expressed in raw SQL, the syntax is shared by Postgres and SQLite.
        let db = manager.get_connection();
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_payments_booking_type_success \
             ON payments (booking_id, payment_type) \
             WHERE status = 'success' AND deleted_at IS NULL",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_payments_vendor_request_success \
             ON payments (vendor_request_id) \
             WHERE status = 'success' AND deleted_at IS NULL AND vendor_request_id IS NOT NULL",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Bookings {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum VendorRequests {
    Table,
    Id,
}

#[derive(DeriveIden)]
pub enum Payments {
    Table,
    Id,
    BookingId,
    VendorRequestId,
    PaymentType,
    AmountMinor,
    Currency,
    GatewayOrderId,
    GatewayPaymentId,
    GatewaySignature,
    Status,
    Method,
    RecordedBy,
    FailureReason,
    PaidAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
