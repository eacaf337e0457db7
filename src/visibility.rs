use chrono::{DateTime, Utc};

use crate::entities::ride;

/// Baseline discovery window for a freshly posted ride.
pub const MINIMUM_DISPLAY_SECS: i64 = 10 * 60;

/// A ride with at least one passenger is assumed in progress and keeps its
/// detail view alive this long after creation.
pub const BOOKED_GRACE_SECS: i64 = 2 * 60 * 60;

/// The display window anchors at accepted_at when present, else created_at.
fn display_anchor(ride: &ride::Model) -> DateTime<Utc> {
    ride.accepted_at
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| ride.created_at.with_timezone(&Utc))
}

/// Window length in seconds: at least the 10-minute baseline, extended by an
/// explicit minimum_display_time deadline when one is set.
pub fn display_window_secs(ride: &ride::Model) -> i64 {
    match ride.minimum_display_time {
        Some(deadline) => {
            let until = (deadline.with_timezone(&Utc) - display_anchor(ride)).num_seconds();
            until.max(MINIMUM_DISPLAY_SECS)
        }
        None => MINIMUM_DISPLAY_SECS,
    }
}

/// Seconds of discovery window left. Monotonically decreasing, 0 exactly at
/// window end.
pub fn remaining_display_seconds(ride: &ride::Model, now: DateTime<Utc>) -> i64 {
    let elapsed = (now - display_anchor(ride)).num_seconds();
    (display_window_secs(ride) - elapsed).max(0)
}

/// Whether the ride should currently appear in public listings.
pub fn is_discoverable(ride: &ride::Model, now: DateTime<Utc>) -> bool {
    ride.seats_available > 0 && remaining_display_seconds(ride, now) > 0
}

/// Whether the ride detail view is past its lifetime. An unbooked ride's
/// relevance ends at the driver's stated arrival deadline; a booked ride gets
/// the long grace window to cover the actual trip.
pub fn is_expired(ride: &ride::Model, passenger_count: usize, now: DateTime<Utc>) -> bool {
    let elapsed = (now - ride.created_at.with_timezone(&Utc)).num_seconds();

    if passenger_count == 0 {
        elapsed > i64::from(ride.driver_arriving_in) * 60
    } else {
        elapsed > BOOKED_GRACE_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use uuid::Uuid;

    use crate::entities::ride::RideStatus;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn test_ride(created_at: DateTime<Utc>) -> ride::Model {
        ride::Model {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            from_location: "North Gate".to_string(),
            to_location: "Airport".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            driver_arriving_in: 5,
            seats_available: 2,
            initial_seats: 2,
            cost_per_person: 120.0,
            cab_screenshot_url: None,
            status: RideStatus::Active,
            accepted_at: None,
            minimum_display_time: None,
            created_at: created_at.fixed_offset(),
            updated_at: created_at.fixed_offset(),
        }
    }

    #[test]
    fn test_discoverable_within_ten_minutes() {
        let created = base_time();
        let ride = test_ride(created);

        assert!(is_discoverable(&ride, created + Duration::seconds(9 * 60 + 59)));
        assert!(!is_discoverable(&ride, created + Duration::seconds(10 * 60 + 1)));
    }

    #[test]
    fn test_not_discoverable_without_seats() {
        let created = base_time();
        let mut ride = test_ride(created);
        ride.seats_available = 0;

        assert!(!is_discoverable(&ride, created + Duration::seconds(30)));
    }

    #[test]
    fn test_remaining_counts_down_to_zero() {
        let created = base_time();
        let ride = test_ride(created);

        assert_eq!(remaining_display_seconds(&ride, created), 600);
        assert_eq!(
            remaining_display_seconds(&ride, created + Duration::seconds(450)),
            150
        );
        assert_eq!(
            remaining_display_seconds(&ride, created + Duration::seconds(600)),
            0
        );
        // Never negative
        assert_eq!(
            remaining_display_seconds(&ride, created + Duration::seconds(9000)),
            0
        );
    }

    #[test]
    fn test_minimum_display_time_extends_window() {
        let created = base_time();
        let mut ride = test_ride(created);
        ride.minimum_display_time = Some((created + Duration::minutes(25)).fixed_offset());

        assert_eq!(display_window_secs(&ride), 25 * 60);
        assert!(is_discoverable(&ride, created + Duration::minutes(20)));
        assert!(!is_discoverable(&ride, created + Duration::minutes(26)));
    }

    #[test]
    fn test_minimum_display_time_never_shrinks_window() {
        let created = base_time();
        let mut ride = test_ride(created);
        ride.minimum_display_time = Some((created + Duration::minutes(2)).fixed_offset());

        assert_eq!(display_window_secs(&ride), MINIMUM_DISPLAY_SECS);
    }

    #[test]
    fn test_accepted_at_re_anchors_window() {
        let created = base_time();
        let mut ride = test_ride(created);
        ride.accepted_at = Some((created + Duration::minutes(8)).fixed_offset());

        // 9 minutes after creation is only 1 minute after acceptance
        let now = created + Duration::minutes(9);
        assert_eq!(remaining_display_seconds(&ride, now), 9 * 60);
    }

    #[test]
    fn test_unbooked_ride_expires_at_arrival_deadline() {
        let created = base_time();
        let ride = test_ride(created); // driver_arriving_in = 5

        assert!(!is_expired(&ride, 0, created + Duration::seconds(4 * 60 + 59)));
        assert!(is_expired(&ride, 0, created + Duration::seconds(5 * 60 + 1)));
    }

    #[test]
    fn test_booked_ride_gets_two_hour_grace() {
        let created = base_time();
        let ride = test_ride(created);

        assert!(!is_expired(&ride, 1, created + Duration::minutes(119)));
        assert!(is_expired(&ride, 1, created + Duration::minutes(121)));
    }
}
