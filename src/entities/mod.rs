pub mod message;
pub mod ride;
pub mod ride_passenger;
pub mod user;
