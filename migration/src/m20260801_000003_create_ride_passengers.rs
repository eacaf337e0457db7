use sea_orm_migration::{prelude::*, schema::*};

use super::m20260801_000001_create_users::User;
use super::m20260801_000002_create_rides::Ride;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RidePassenger::Table)
                    .if_not_exists()
                    .col(uuid(RidePassenger::Id).primary_key())
                    .col(uuid(RidePassenger::RideId).not_null())
                    .col(uuid(RidePassenger::UserId).not_null())
                    .col(
                        timestamp_with_time_zone(RidePassenger::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_passenger_ride")
                            .from(RidePassenger::Table, RidePassenger::RideId)
                            .to(Ride::Table, Ride::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_passenger_user")
                            .from(RidePassenger::Table, RidePassenger::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One seat per user per ride
        manager
            .create_index(
                Index::create()
                    .name("idx_ride_passenger_unique")
                    .table(RidePassenger::Table)
                    .col(RidePassenger::RideId)
                    .col(RidePassenger::UserId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RidePassenger::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RidePassenger {
    Table,
    Id,
    RideId,
    UserId,
    CreatedAt,
}
