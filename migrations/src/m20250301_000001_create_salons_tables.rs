use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Salons::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Salons::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Salons::Name).string().not_null())
                    .col(ColumnDef::new(Salons::VendorId).uuid().not_null())
                    .col(
                        ColumnDef::new(Salons::IsActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Salons::RegistrationPaid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Salons::ActivatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Salons::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_salons_vendor_id")
                    .table(Salons::Table)
                    .col(Salons::VendorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SalonServices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SalonServices::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SalonServices::SalonId).uuid().not_null())
                    .col(ColumnDef::new(SalonServices::Name).string().not_null())
                    .col(
                        ColumnDef::new(SalonServices::PriceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SalonServices::DurationMinutes)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(SalonServices::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_salon_services_salon")
                            .from(SalonServices::Table, SalonServices::SalonId)
                            .to(Salons::Table, Salons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_salon_services_salon_id")
                    .table(SalonServices::Table)
                    .col(SalonServices::SalonId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VendorRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VendorRequests::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VendorRequests::VendorId).uuid().not_null())
                    .col(ColumnDef::new(VendorRequests::SalonId).uuid().not_null())
                    .col(
                        ColumnDef::new(VendorRequests::RegistrationFeeMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VendorRequests::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(VendorRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VendorRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vendor_requests_salon")
                            .from(VendorRequests::Table, VendorRequests::SalonId)
                            .to(Salons::Table, Salons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VendorRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SalonServices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Salons::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Salons {
    Table,
    Id,
    Name,
    VendorId,
    IsActive,
    RegistrationPaid,
    ActivatedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum SalonServices {
    Table,
    Id,
    SalonId,
    Name,
    PriceMinor,
    DurationMinutes,
    IsActive,
}

#[derive(DeriveIden)]
pub enum VendorRequests {
    Table,
    Id,
    VendorId,
    SalonId,
    RegistrationFeeMinor,
    Status,
    CreatedAt,
    UpdatedAt,
}
