use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::entities::{ride_passenger, user};
use crate::error::AppError;
use crate::realtime::events::ServerEvent;
use crate::realtime::hub::Hub;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Ride not found")]
    RideNotFound,
    #[error("No seats available")]
    NoSeatsAvailable,
    #[error("Already booked this ride")]
    AlreadyBooked,
    #[error(transparent)]
    Persistence(#[from] DbErr),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::RideNotFound => AppError::NotFound("Ride not found".to_string()),
            BookingError::NoSeatsAvailable => AppError::Conflict("No seats available".to_string()),
            BookingError::AlreadyBooked => {
                AppError::Conflict("Already booked this ride".to_string())
            }
            BookingError::Persistence(e) => e.into(),
        }
    }
}

// ============ Populated ride view ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
}

/// Ride with driver and passenger display names resolved; the shape every
/// ride endpoint and ride-scoped socket event carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideView {
    pub id: Uuid,
    pub driver: UserSummary,
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub driver_arriving_in: i32,
    pub seats_available: i32,
    pub initial_seats: i32,
    pub cost_per_person: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cab_screenshot_url: Option<String>,
    pub booked_by: Vec<UserSummary>,
    pub status: RideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_display_time: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
    pub updated_at: chrono::DateTime<chrono::FixedOffset>,
}

/// Resolve display names for a batch of rides, preserving order.
pub async fn load_ride_views<C>(db: &C, rides: Vec<ride::Model>) -> Result<Vec<RideView>, DbErr>
where
    C: ConnectionTrait,
{
    let ride_ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();

    let links = ride_passenger::Entity::find()
        .filter(ride_passenger::Column::RideId.is_in(ride_ids))
        .order_by_asc(ride_passenger::Column::CreatedAt)
        .all(db)
        .await?;

    let users = user::Entity::find().all(db).await?;

    let views = rides
        .into_iter()
        .map(|r| {
            let driver_name = users
                .iter()
                .find(|u| u.id == r.driver_id)
                .map(|u| u.name.clone())
                .unwrap_or_default();

            let booked_by: Vec<UserSummary> = links
                .iter()
                .filter(|l| l.ride_id == r.id)
                .filter_map(|l| users.iter().find(|u| u.id == l.user_id))
                .map(|u| UserSummary {
                    id: u.id,
                    name: u.name.clone(),
                })
                .collect();

            RideView {
                id: r.id,
                driver: UserSummary {
                    id: r.driver_id,
                    name: driver_name,
                },
                from: r.from_location,
                to: r.to_location,
                date: r.date,
                driver_arriving_in: r.driver_arriving_in,
                seats_available: r.seats_available,
                initial_seats: r.initial_seats,
                cost_per_person: r.cost_per_person,
                cab_screenshot_url: r.cab_screenshot_url,
                booked_by,
                status: r.status,
                accepted_at: r.accepted_at,
                minimum_display_time: r.minimum_display_time,
                created_at: r.created_at,
                updated_at: r.updated_at,
            }
        })
        .collect();

    Ok(views)
}

pub async fn load_ride_view<C>(db: &C, ride: ride::Model) -> Result<RideView, DbErr>
where
    C: ConnectionTrait,
{
    let mut views = load_ride_views(db, vec![ride]).await?;
    views
        .pop()
        .ok_or_else(|| DbErr::Custom("ride view assembly produced no row".to_string()))
}

// ============ Booking engine ============

/// Booking preconditions over a consistent ride snapshot. Callers must hold
/// the snapshot stable (row lock) for the result to remain valid.
pub fn check_booking(
    seats_available: i32,
    booked_by: &[Uuid],
    requester: Uuid,
) -> Result<(), BookingError> {
    if seats_available <= 0 {
        return Err(BookingError::NoSeatsAvailable);
    }

    if booked_by.contains(&requester) {
        return Err(BookingError::AlreadyBooked);
    }

    Ok(())
}

/// Book one seat for `requester`, append them to the passenger list and
/// decrement the seat pool as a single committed mutation.
///
/// Concurrent attempts on the same ride serialize on a SELECT ... FOR UPDATE
/// row lock; the seat decrement is additionally conditional on
/// `seats_available > 0`, so N concurrent attempts against K free seats
/// commit exactly min(N, K) bookings. Notifications go out only after the
/// transaction commits.
pub async fn book_seat(
    db: &DatabaseConnection,
    hub: &Hub,
    ride_id: Uuid,
    requester: Uuid,
) -> Result<RideView, BookingError> {
    let txn = db.begin().await?;

    let locked = ride::Entity::find_by_id(ride_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or(BookingError::RideNotFound)?;

    let booked_by: Vec<Uuid> = ride_passenger::Entity::find()
        .filter(ride_passenger::Column::RideId.eq(ride_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| p.user_id)
        .collect();

    check_booking(locked.seats_available, &booked_by, requester)?;

    let now = Utc::now().fixed_offset();

    ride_passenger::ActiveModel {
        id: Set(Uuid::new_v4()),
        ride_id: Set(ride_id),
        user_id: Set(requester),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    let updated = ride::Entity::update_many()
        .col_expr(
            ride::Column::SeatsAvailable,
            Expr::col(ride::Column::SeatsAvailable).sub(1),
        )
        .col_expr(ride::Column::UpdatedAt, Expr::value(now))
        .filter(ride::Column::Id.eq(ride_id))
        .filter(ride::Column::SeatsAvailable.gt(0))
        .exec(&txn)
        .await?;

    // rows_affected == 0 means the pool drained despite the lock; that state
    // must never commit.
    if updated.rows_affected == 0 {
        return Err(BookingError::NoSeatsAvailable);
    }

    txn.commit().await?;

    let ride = ride::Entity::find_by_id(ride_id)
        .one(db)
        .await?
        .ok_or(BookingError::RideNotFound)?;
    let view = load_ride_view(db, ride).await?;

    let by_name = view
        .booked_by
        .iter()
        .find(|u| u.id == requester)
        .map(|u| u.name.clone())
        .unwrap_or_default();

    // Driver gets the private confirmation, the ride room gets the
    // passenger-list refresh. Nothing is emitted on any failure path above.
    hub.emit_to_room(
        &Hub::driver_room(view.driver.id),
        ServerEvent::RideBooked {
            ride_id,
            by_user_id: requester,
            driver_id: view.driver.id,
            message: format!("{} booked your ride", by_name),
            ride: view.clone(),
        },
    )
    .await;

    hub.emit_to_room(
        &ride_id.to_string(),
        ServerEvent::PassengerUpdated {
            ride_id,
            passengers: view.booked_by.clone(),
        },
    )
    .await;

    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_booking_accepts_free_seat() {
        let requester = Uuid::new_v4();
        assert!(check_booking(2, &[], requester).is_ok());
    }

    #[test]
    fn test_check_booking_rejects_empty_pool() {
        let requester = Uuid::new_v4();
        let result = check_booking(0, &[], requester);
        assert!(matches!(result, Err(BookingError::NoSeatsAvailable)));
    }

    #[test]
    fn test_check_booking_rejects_duplicate() {
        let requester = Uuid::new_v4();
        let result = check_booking(1, &[Uuid::new_v4(), requester], requester);
        assert!(matches!(result, Err(BookingError::AlreadyBooked)));
    }

    #[test]
    fn test_booking_sequence_holds_seat_invariant() {
        // Ride posted with two seats: A books, A retries, B books, C bounces.
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let initial_seats = 2;
        let mut seats = initial_seats;
        let mut booked: Vec<Uuid> = Vec::new();

        let mut attempt = |seats: &mut i32, booked: &mut Vec<Uuid>, who: Uuid| {
            let outcome = check_booking(*seats, booked, who);
            if outcome.is_ok() {
                booked.push(who);
                *seats -= 1;
            }
            outcome
        };

        assert!(attempt(&mut seats, &mut booked, a).is_ok());
        assert_eq!((seats, booked.len()), (1, 1));

        assert!(matches!(
            attempt(&mut seats, &mut booked, a),
            Err(BookingError::AlreadyBooked)
        ));
        assert_eq!((seats, booked.len()), (1, 1));

        assert!(attempt(&mut seats, &mut booked, b).is_ok());
        assert_eq!((seats, booked.len()), (0, 2));

        assert!(matches!(
            attempt(&mut seats, &mut booked, c),
            Err(BookingError::NoSeatsAvailable)
        ));

        // Invariants after the whole sequence
        assert!(seats >= 0 && seats <= initial_seats);
        assert_eq!(booked.len() as i32, initial_seats - seats);
        let mut deduped = booked.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), booked.len());
    }

    #[test]
    fn test_overdemand_books_exactly_capacity() {
        // Five distinct users race for three seats; exactly three commit.
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let mut seats = 3;
        let mut booked: Vec<Uuid> = Vec::new();
        let mut rejected = 0;

        for &who in &users {
            match check_booking(seats, &booked, who) {
                Ok(()) => {
                    booked.push(who);
                    seats -= 1;
                }
                Err(BookingError::NoSeatsAvailable) => rejected += 1,
                Err(other) => panic!("unexpected rejection: {other}"),
            }
        }

        assert_eq!(booked.len(), 3);
        assert_eq!(rejected, 2);
        assert_eq!(seats, 0);
    }
}
