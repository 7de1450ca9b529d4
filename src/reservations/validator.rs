use chrono::NaiveDate;
use thiserror::Error;

use crate::db::models::{DateRange, Reservation, Room, User};

/// Why a booking request was refused. Each variant is actionable by the
/// requester; none of them is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("managers cannot reserve rooms")]
    RoleNotAllowed,

    #[error("check-in date {check_in} is in the past (today is {today})")]
    PastCheckIn { check_in: NaiveDate, today: NaiveDate },

    #[error("check-out date {check_out} must be after check-in date {check_in}")]
    InvalidRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },

    #[error("you already have a reservation for room {room_number}; cancel it first")]
    AlreadyHasReservation {
        room_number: String,
        reservation_id: i64,
    },

    #[error("room {room_number} is already reserved {}", describe_hold(.check_in, .check_out))]
    DateConflict {
        room_number: String,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    },
}

impl Rejection {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::RoleNotAllowed => "role_not_allowed",
            Rejection::PastCheckIn { .. } => "past_check_in",
            Rejection::InvalidRange { .. } => "invalid_range",
            Rejection::AlreadyHasReservation { .. } => "already_has_reservation",
            Rejection::DateConflict { .. } => "date_conflict",
        }
    }

    pub(crate) fn already_holds(reservation: &Reservation) -> Self {
        Rejection::AlreadyHasReservation {
            room_number: reservation.room_number.clone(),
            reservation_id: reservation.id,
        }
    }

    pub(crate) fn conflicts_with(reservation: &Reservation) -> Self {
        Rejection::DateConflict {
            room_number: reservation.room_number.clone(),
            check_in: reservation.check_in,
            check_out: reservation.check_out,
        }
    }
}

fn describe_hold(check_in: &Option<NaiveDate>, check_out: &Option<NaiveDate>) -> String {
    match (check_in, check_out) {
        (Some(from), Some(to)) => format!("from {from} to {to}; please choose different dates"),
        (Some(from), None) => format!("from {from} onwards"),
        (None, Some(to)) => format!("until {to}"),
        (None, None) => "by another user".to_owned(),
    }
}

/// Decide whether `requester` may book `room` for `[check_in, check_out]`.
///
/// Checks run in a fixed order and the first failure wins:
/// role, past check-in, empty range, existing live reservation held by the
/// requester (`held`), then overlap with the room's live guest bookings.
/// Manager-owned and non-live rows in `room_reservations` are ignored.
pub fn validate(
    requester: &User,
    room: &Room,
    check_in: NaiveDate,
    check_out: NaiveDate,
    today: NaiveDate,
    held: Option<&Reservation>,
    room_reservations: &[Reservation],
) -> Result<DateRange, Rejection> {
    if requester.role.is_manager() {
        return Err(Rejection::RoleNotAllowed);
    }

    if check_in < today {
        return Err(Rejection::PastCheckIn { check_in, today });
    }

    if check_out <= check_in {
        return Err(Rejection::InvalidRange {
            check_in,
            check_out,
        });
    }

    if let Some(held) = held.filter(|r| r.is_live()) {
        return Err(Rejection::already_holds(held));
    }

    let requested = DateRange::new(check_in, check_out);
    if let Some(conflict) = first_conflict(&room.room_number, &requested, room_reservations) {
        return Err(Rejection::conflicts_with(conflict));
    }

    Ok(requested)
}

/// Lowest-id live guest reservation on `room_number` colliding with `requested`.
pub fn first_conflict<'a>(
    room_number: &str,
    requested: &DateRange,
    reservations: &'a [Reservation],
) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| {
            r.room_number == room_number
                && r.is_live()
                && !r.user_role.is_manager()
                && r.blocks(requested)
        })
        .min_by_key(|r| r.id)
}
