use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Local, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{self, load_ride_view, load_ride_views, RideView};
use crate::entities::ride::{self, RideStatus};
use crate::entities::ride_passenger;
use crate::error::{AppError, AppResult};
use crate::realtime::events::ServerEvent;
use crate::realtime::hub::Hub;
use crate::utils::jwt::Claims;
use crate::visibility;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub driver_arriving_in: i32,
    pub seats_available: i32,
    pub cost_per_person: f64,
    pub cab_screenshot_url: Option<String>,
}

/// Create a ride posting. The capacity snapshot is taken here, exactly once.
pub async fn create_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRideRequest>,
) -> AppResult<(StatusCode, Json<RideView>)> {
    let from = payload.from.trim().to_string();
    let to = payload.to.trim().to_string();

    if from.is_empty() {
        return Err(AppError::BadRequest(
            "Starting location must not be empty".to_string(),
        ));
    }
    if to.is_empty() {
        return Err(AppError::BadRequest(
            "Destination must not be empty".to_string(),
        ));
    }
    // Validated against local midnight, not the current instant
    if payload.date < Local::now().date_naive() {
        return Err(AppError::BadRequest(
            "Date must not be in the past".to_string(),
        ));
    }
    if payload.driver_arriving_in < 0 {
        return Err(AppError::BadRequest(
            "Driver arrival time must not be negative".to_string(),
        ));
    }
    if payload.seats_available < 1 {
        return Err(AppError::BadRequest(
            "Seats available must be at least 1".to_string(),
        ));
    }
    if payload.cost_per_person < 0.0 {
        return Err(AppError::BadRequest(
            "Cost per person must be non-negative".to_string(),
        ));
    }

    let now = Utc::now().fixed_offset();
    let new_ride = ride::ActiveModel {
        id: Set(Uuid::new_v4()),
        driver_id: Set(claims.sub),
        from_location: Set(from),
        to_location: Set(to),
        date: Set(payload.date),
        driver_arriving_in: Set(payload.driver_arriving_in),
        seats_available: Set(payload.seats_available),
        initial_seats: Set(payload.seats_available),
        cost_per_person: Set(payload.cost_per_person),
        cab_screenshot_url: Set(payload.cab_screenshot_url),
        status: Set(RideStatus::Active),
        accepted_at: Set(None),
        minimum_display_time: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let saved = new_ride.insert(&state.db).await?;
    let view = load_ride_view(&state.db, saved).await?;

    state
        .hub
        .emit_to_room(
            &Hub::driver_room(claims.sub),
            ServerEvent::RideUpdate {
                driver_id: claims.sub,
                action: "create".to_string(),
                ride: view.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRidesQuery {
    pub sort_by: Option<String>,
    pub seats: Option<i32>,
}

/// List discoverable rides. The visibility window is enforced server side;
/// clients only ever see rides still inside their display window.
pub async fn list_rides(
    State(state): State<AppState>,
    Query(params): Query<ListRidesQuery>,
) -> AppResult<Json<Vec<RideView>>> {
    let mut query = ride::Entity::find().filter(ride::Column::Status.eq(RideStatus::Active));

    if let Some(min_seats) = params.seats {
        query = query.filter(ride::Column::SeatsAvailable.gte(min_seats));
    }

    query = match params.sort_by.as_deref() {
        Some("cost") => query.order_by_asc(ride::Column::CostPerPerson),
        Some("date") => query.order_by_asc(ride::Column::Date),
        _ => query.order_by_desc(ride::Column::CreatedAt),
    };

    let now = Utc::now();
    let rides: Vec<ride::Model> = query
        .all(&state.db)
        .await?
        .into_iter()
        .filter(|r| visibility::is_discoverable(r, now))
        .collect();

    Ok(Json(load_ride_views(&state.db, rides).await?))
}

/// Ride detail. Expired rides answer with the distinct `expired` shape, and
/// an active ride observed past its lifetime is transitioned to completed on
/// the spot (no background sweep).
pub async fn get_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RideView>> {
    let ride = ride::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    let passenger_count = ride_passenger::Entity::find()
        .filter(ride_passenger::Column::RideId.eq(id))
        .count(&state.db)
        .await?;

    if visibility::is_expired(&ride, passenger_count as usize, Utc::now()) {
        if ride.status == RideStatus::Active {
            let mut active: ride::ActiveModel = ride.into();
            active.status = Set(RideStatus::Completed);
            active.updated_at = Set(Utc::now().fixed_offset());
            active.update(&state.db).await?;
        }
        return Err(AppError::Expired("Ride has ended".to_string()));
    }

    Ok(Json(load_ride_view(&state.db, ride).await?))
}

/// POST /api/rides/{id}/book
pub async fn book_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let ride = booking::book_seat(&state.db, &state.hub, id, claims.sub).await?;

    Ok(Json(serde_json::json!({
        "msg": "Seat booked successfully",
        "ride": ride,
    })))
}

/// POST /api/rides/{id}/accept — the historical second name for booking a
/// seat; same engine, bare ride response
pub async fn accept_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RideView>> {
    let ride = booking::book_seat(&state.db, &state.hub, id, claims.sub).await?;
    Ok(Json(ride))
}

/// Acknowledge a rejection without recording anything. Deliberately a no-op
/// on ride state: no rejection ledger exists yet and the seat pool must not
/// move.
pub async fn reject_ride(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    if ride::Entity::find_by_id(id).one(&state.db).await?.is_none() {
        return Err(AppError::NotFound("Ride not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "msg": "Ride rejected" })))
}

// ============ Ownership-scoped listings ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedRideView {
    #[serde(flatten)]
    pub ride: RideView,
    pub ride_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRideView {
    #[serde(flatten)]
    pub ride: RideView,
    pub is_booked: bool,
    pub is_posted_by_user: bool,
}

/// Rides the caller has posted, newest first
pub async fn my_rides(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<RideView>>> {
    let rides = ride::Entity::find()
        .filter(ride::Column::DriverId.eq(claims.sub))
        .order_by_desc(ride::Column::CreatedAt)
        .all(&state.db)
        .await?;

    Ok(Json(load_ride_views(&state.db, rides).await?))
}

async fn rides_booked_by(state: &AppState, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    let links = ride_passenger::Entity::find()
        .filter(ride_passenger::Column::UserId.eq(user_id))
        .all(&state.db)
        .await?;

    Ok(links.into_iter().map(|l| l.ride_id).collect())
}

/// Current rides the caller sits on as a passenger
pub async fn booked_rides(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<TypedRideView>>> {
    let ride_ids = rides_booked_by(&state, claims.sub).await?;
    let today = Local::now().date_naive();

    let rides = ride::Entity::find()
        .filter(ride::Column::Id.is_in(ride_ids))
        .filter(ride::Column::Date.gte(today))
        .filter(ride::Column::Status.ne(RideStatus::Completed))
        .order_by_desc(ride::Column::Date)
        .all(&state.db)
        .await?;

    let views = load_ride_views(&state.db, rides)
        .await?
        .into_iter()
        .map(|ride| TypedRideView {
            ride,
            ride_type: "booked",
        })
        .collect();

    Ok(Json(views))
}

/// Current rides the caller has posted as a driver
pub async fn posted_rides(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<TypedRideView>>> {
    let today = Local::now().date_naive();

    let rides = ride::Entity::find()
        .filter(ride::Column::DriverId.eq(claims.sub))
        .filter(ride::Column::Date.gte(today))
        .filter(ride::Column::Status.ne(RideStatus::Completed))
        .order_by_desc(ride::Column::Date)
        .all(&state.db)
        .await?;

    let views = load_ride_views(&state.db, rides)
        .await?
        .into_iter()
        .map(|ride| TypedRideView {
            ride,
            ride_type: "posted",
        })
        .collect();

    Ok(Json(views))
}

/// Everything the caller was ever involved in, both roles, newest first
pub async fn ride_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<HistoryRideView>>> {
    let booked_ids = rides_booked_by(&state, claims.sub).await?;

    let booked = ride::Entity::find()
        .filter(ride::Column::Id.is_in(booked_ids))
        .order_by_desc(ride::Column::Date)
        .all(&state.db)
        .await?;

    let posted = ride::Entity::find()
        .filter(ride::Column::DriverId.eq(claims.sub))
        .order_by_desc(ride::Column::Date)
        .all(&state.db)
        .await?;

    let mut history: Vec<HistoryRideView> = load_ride_views(&state.db, booked)
        .await?
        .into_iter()
        .map(|ride| HistoryRideView {
            ride,
            is_booked: true,
            is_posted_by_user: false,
        })
        .collect();

    history.extend(
        load_ride_views(&state.db, posted)
            .await?
            .into_iter()
            .map(|ride| HistoryRideView {
                ride,
                is_booked: false,
                is_posted_by_user: true,
            }),
    );

    history.sort_by(|a, b| {
        b.ride
            .date
            .cmp(&a.ride.date)
            .then(b.ride.created_at.cmp(&a.ride.created_at))
    });

    Ok(Json(history))
}
