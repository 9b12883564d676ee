use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bookings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bookings::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Bookings::BookingNumber).string().not_null())
                    .col(ColumnDef::new(Bookings::CustomerId).uuid().not_null())
                    .col(ColumnDef::new(Bookings::SalonId).uuid().not_null())
                    .col(ColumnDef::new(Bookings::BookingDate).date().not_null())
                    .col(ColumnDef::new(Bookings::BookingTime).string_len(5).not_null())
                    .col(ColumnDef::new(Bookings::RequestedSlots).json().not_null())
                    .col(
                        ColumnDef::new(Bookings::ServicePriceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::ConvenienceFeeMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::TotalAmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::Currency)
                            .string_len(3)
                            .not_null()
                            .default("INR"),
                    )
                    .col(
                        ColumnDef::new(Bookings::PricingMode)
                            .string()
                            .not_null()
                            .default("standard"),
                    )
                    .col(
                        ColumnDef::new(Bookings::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Bookings::ServicePaid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Bookings::CancellationReason).text().null())
                    .col(ColumnDef::new(Bookings::Notes).text().null())
                    .col(
                        ColumnDef::new(Bookings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::ConfirmedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_salon")
                            .from(Bookings::Table, Bookings::SalonId)
                            .to(Salons::Table, Salons::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Booking numbers are display identifiers, collisions are tolerated
        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_booking_number")
                    .table(Bookings::Table)
                    .col(Bookings::BookingNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_customer_status")
                    .table(Bookings::Table)
                    .col(Bookings::CustomerId)
                    .col(Bookings::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_salon_date")
                    .table(Bookings::Table)
                    .col(Bookings::SalonId)
                    .col(Bookings::BookingDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BookingServices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BookingServices::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BookingServices::BookingId).uuid().not_null())
                    .col(ColumnDef::new(BookingServices::ServiceId).uuid().not_null())
                    .col(ColumnDef::new(BookingServices::ServiceName).string().not_null())
                    .col(ColumnDef::new(BookingServices::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(BookingServices::UnitPriceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingServices::LineTotalMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingServices::DurationMinutes)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BookingServices::Position).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_services_booking")
                            .from(BookingServices::Table, BookingServices::BookingId)
                            .to(Bookings::Table, Bookings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_services_booking_id")
                    .table(BookingServices::Table)
                    .col(BookingServices::BookingId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BookingServices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bookings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Salons {
    Table,
    Id,
}

#[derive(DeriveIden)]
pub enum Bookings {
    Table,
    Id,
    BookingNumber,
    CustomerId,
    SalonId,
    BookingDate,
    BookingTime,
    RequestedSlots,
    ServicePriceMinor,
    ConvenienceFeeMinor,
    TotalAmountMinor,
    Currency,
    PricingMode,
    Status,
    ServicePaid,
    CancellationReason,
    Notes,
    CreatedAt,
    UpdatedAt,
    ConfirmedAt,
    CompletedAt,
    CancelledAt,
}

#[derive(DeriveIden)]
pub enum BookingServices {
    Table,
    Id,
    BookingId,
    ServiceId,
    ServiceName,
    Quantity,
    UnitPriceMinor,
    LineTotalMinor,
    DurationMinutes,
    Position,
}
