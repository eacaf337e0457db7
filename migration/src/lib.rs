pub use sea_orm_migration::prelude::*;

mod m20260801_000001_create_users;
mod m20260801_000002_create_rides;
mod m20260801_000003_create_ride_passengers;
mod m20260801_000004_create_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_users::Migration),
            Box::new(m20260801_000002_create_rides::Migration),
            Box::new(m20260801_000003_create_ride_passengers::Migration),
            Box::new(m20260801_000004_create_messages::Migration),
        ]
    }
}
