use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Refunds::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Refunds::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Refunds::PaymentId).uuid().not_null())
                    .col(ColumnDef::new(Refunds::BookingId).uuid().not_null())
                    .col(ColumnDef::new(Refunds::AmountMinor).big_integer().not_null())
                    .col(
                        ColumnDef::new(Refunds::Currency)
                            .string_len(3)
                            .not_null()
                            .default("INR"),
                    )
                    .col(
                        ColumnDef::new(Refunds::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Refunds::GatewayRefundId).string().null())
                    .col(
                        ColumnDef::new(Refunds::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Refunds::LastError).text().null())
                    .col(
                        ColumnDef::new(Refunds::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Refunds::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Refunds::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_refunds_payment")
                            .from(Refunds::Table, Refunds::PaymentId)
                            .to(Payments::Table, Payments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // One refund per captured leg
        manager
            .create_index(
                Index::create()
                    .name("uq_refunds_payment_id")
                    .table(Refunds::Table)
                    .col(Refunds::PaymentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_refunds_status")
                    .table(Refunds::Table)
                    .col(Refunds::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Refunds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
}

#[derive(DeriveIden)]
pub enum Refunds {
    Table,
    Id,
    PaymentId,
    BookingId,
    AmountMinor,
    Currency,
    Status,
    GatewayRefundId,
    Attempts,
    LastError,
    CreatedAt,
    UpdatedAt,
    ProcessedAt,
}
