pub mod booking;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod realtime;
pub mod routes;
pub mod utils;
pub mod visibility;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use realtime::Hub;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
    pub hub: Hub,
}
