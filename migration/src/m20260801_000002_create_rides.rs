use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20260801_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create ride status enum
        manager
            .create_type(
                Type::create()
                    .as_enum(RideStatus::Enum)
                    .values([
                        RideStatus::Active,
                        RideStatus::Completed,
                        RideStatus::Cancelled,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Ride::Table)
                    .if_not_exists()
                    .col(uuid(Ride::Id).primary_key())
                    .col(uuid(Ride::DriverId).not_null())
                    .col(string_len(Ride::FromLocation, 255).not_null())
                    .col(string_len(Ride::ToLocation, 255).not_null())
                    .col(date(Ride::Date).not_null())
                    .col(integer(Ride::DriverArrivingIn).not_null())
                    .col(
                        integer(Ride::SeatsAvailable)
                            .not_null()
                            .check(Expr::col(Ride::SeatsAvailable).gte(0)),
                    )
                    .col(integer(Ride::InitialSeats).not_null())
                    .col(double(Ride::CostPerPerson).not_null())
                    .col(string_len_null(Ride::CabScreenshotUrl, 1024))
                    .col(
                        ColumnDef::new(Ride::Status)
                            .custom(RideStatus::Enum)
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone_null(Ride::AcceptedAt))
                    .col(timestamp_with_time_zone_null(Ride::MinimumDisplayTime))
                    .col(
                        timestamp_with_time_zone(Ride::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Ride::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_driver")
                            .from(Ride::Table, Ride::DriverId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Ride::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(RideStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Ride {
    Table,
    Id,
    DriverId,
    FromLocation,
    ToLocation,
    Date,
    DriverArrivingIn,
    SeatsAvailable,
    InitialSeats,
    CostPerPerson,
    CabScreenshotUrl,
    Status,
    AcceptedAt,
    MinimumDisplayTime,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum RideStatus {
    #[sea_orm(iden = "ride_status")]
    Enum,
    #[sea_orm(iden = "active")]
    Active,
    #[sea_orm(iden = "completed")]
    Completed,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}
