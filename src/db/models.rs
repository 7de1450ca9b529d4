use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Mirrors the `user_role` Postgres enum.
///
/// Managers see every room but never hold bookings; normal users book at
/// most one room at a time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Manager,
    #[default]
    Normal,
}

impl Role {
    pub fn is_manager(self) -> bool {
        self == Role::Manager
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Room {
    pub room_number: String,
    pub has_iot_device: bool,
    pub iot_device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Device id to query, only when the room is flagged as sensor-equipped.
    pub fn sensor_device(&self) -> Option<&str> {
        if self.has_iot_device {
            self.iot_device_id.as_deref().filter(|id| !id.is_empty())
        } else {
            None
        }
    }
}

/// Provisioning input for a single room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub room_number: String,
    pub iot_device_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// Mirrors the `reservation_status` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// `Reserved` and `Active` hold a room; the other two are terminal.
    pub fn is_live(self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Inclusive `[check_in, check_out]` stay.
///
/// Two stays only collide when they share a night: a guest checking out on
/// the day the next one checks in is not a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl DateRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        !(self.check_out <= other.check_in || self.check_in >= other.check_out)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day <= self.check_out
    }
}

/// A reservation joined with its owner's name and role.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub user_role: Role,
    pub room_number: String,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub notes: String,
}

impl Reservation {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn range(&self) -> Option<DateRange> {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => Some(DateRange::new(check_in, check_out)),
            _ => None,
        }
    }

    /// Whether this reservation holds the room on `day`.
    ///
    /// Rows carrying no dates at all predate date selection and count as
    /// holding the room on every day. Half-dated rows never cover a day.
    pub fn covers(&self, day: NaiveDate) -> bool {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => DateRange::new(check_in, check_out).contains(day),
            (None, None) => true,
            _ => false,
        }
    }

    /// Whether a new stay over `range` collides with this reservation.
    ///
    /// A missing bound is unbounded, matching the `daterange` exclusion
    /// constraint in the database.
    pub fn blocks(&self, range: &DateRange) -> bool {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => {
                DateRange::new(check_in, check_out).overlaps(range)
            }
            (Some(check_in), None) => range.check_out > check_in,
            (None, Some(check_out)) => range.check_in < check_out,
            (None, None) => true,
        }
    }

    /// Checked out strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.check_out.is_some_and(|check_out| check_out < today)
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub user_id: Uuid,
    pub room_number: String,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub notes: String,
}

// ---------------------------------------------------------------------------
// Occupancy history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct OccupancyRecord {
    pub id: i64,
    pub room_number: String,
    pub occupied: bool,
    pub recorded_at: DateTime<Utc>,
    /// Raw payload reported by the room's device.
    #[schema(value_type = Object)]
    pub sensor_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn reservation(check_in: Option<&str>, check_out: Option<&str>) -> Reservation {
        Reservation {
            id: 1,
            user_id: Uuid::new_v4(),
            username: "guest".into(),
            user_role: Role::Normal,
            room_number: "101".into(),
            status: ReservationStatus::Reserved,
            reserved_at: Utc::now(),
            check_in: check_in.map(d),
            check_out: check_out.map(d),
            notes: String::new(),
        }
    }

    #[test]
    fn ranges_touching_at_checkout_do_not_overlap() {
        let a = DateRange::new(d("2024-01-10"), d("2024-01-15"));
        let b = DateRange::new(d("2024-01-15"), d("2024-01-20"));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn ranges_sharing_a_night_overlap() {
        let a = DateRange::new(d("2024-01-10"), d("2024-01-15"));
        let b = DateRange::new(d("2024-01-12"), d("2024-01-20"));
        let inner = DateRange::new(d("2024-01-11"), d("2024-01-12"));
        assert!(a.overlaps(&b));
        assert!(a.overlaps(&inner));
        assert!(inner.overlaps(&a));
    }

    #[test]
    fn covers_is_inclusive_on_both_ends() {
        let r = reservation(Some("2024-01-10"), Some("2024-01-15"));
        assert!(r.covers(d("2024-01-10")));
        assert!(r.covers(d("2024-01-15")));
        assert!(!r.covers(d("2024-01-09")));
        assert!(!r.covers(d("2024-01-16")));
    }

    #[test]
    fn undated_reservation_covers_every_day_and_blocks_everything() {
        let r = reservation(None, None);
        assert!(r.covers(d("1999-12-31")));
        assert!(r.blocks(&DateRange::new(d("2030-01-01"), d("2030-01-02"))));
    }

    #[test]
    fn half_dated_reservation_never_covers_but_blocks_open_side() {
        let r = reservation(Some("2024-01-10"), None);
        assert!(!r.covers(d("2024-01-12")));
        assert!(r.blocks(&DateRange::new(d("2024-02-01"), d("2024-02-03"))));
        assert!(!r.blocks(&DateRange::new(d("2024-01-05"), d("2024-01-10"))));
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let r = reservation(Some("2024-01-25"), Some("2024-01-30"));
        assert!(r.is_expired(d("2024-01-31")));
        assert!(!r.is_expired(d("2024-01-30")));
        assert!(!reservation(None, None).is_expired(d("2030-01-01")));
    }

    #[test]
    fn only_reserved_and_active_are_live() {
        assert!(ReservationStatus::Reserved.is_live());
        assert!(ReservationStatus::Active.is_live());
        assert!(!ReservationStatus::Completed.is_live());
        assert!(!ReservationStatus::Cancelled.is_live());
    }

    #[test]
    fn sensor_device_requires_flag_and_id() {
        let mut room = Room {
            room_number: "101".into(),
            has_iot_device: true,
            iot_device_id: Some("dev-101".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(room.sensor_device(), Some("dev-101"));
        room.has_iot_device = false;
        assert_eq!(room.sensor_device(), None);
        room.has_iot_device = true;
        room.iot_device_id = None;
        assert_eq!(room.sensor_device(), None);
    }
}
