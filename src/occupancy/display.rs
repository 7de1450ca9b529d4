use chrono::NaiveDate;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::resolver::Occupancy;
use crate::db::models::Reservation;

/// How a room is painted for a particular viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomColor {
    /// The viewer's own reservation covers today.
    Own,
    /// Held by someone else, or a sensor reports presence.
    Occupied,
    Available,
}

impl RoomColor {
    pub fn for_viewer(occupancy: &Occupancy, viewer_id: Uuid) -> Self {
        if occupancy.is_held_by(viewer_id) {
            RoomColor::Own
        } else if occupancy.occupied {
            RoomColor::Occupied
        } else {
            RoomColor::Available
        }
    }

    pub fn css(self) -> &'static str {
        match self {
            RoomColor::Own => "green",
            RoomColor::Occupied => "yellow",
            RoomColor::Available => "white",
        }
    }
}

/// Earliest live guest booking of `room_number` that starts after `today`.
pub fn upcoming_booking<'a>(
    room_number: &str,
    reservations: &'a [Reservation],
    today: NaiveDate,
) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| r.room_number == room_number && r.is_live() && !r.user_role.is_manager())
        .filter_map(|r| r.check_in.filter(|check_in| *check_in > today).map(|check_in| (check_in, r)))
        .min_by_key(|(check_in, r)| (*check_in, r.id))
        .map(|(_, r)| r)
}

/// A room can be picked unless another guest holds it today. Sensor
/// presence alone does not block booking later dates.
pub fn can_select(occupancy: &Occupancy, viewer_id: Uuid) -> bool {
    match &occupancy.reserved_by {
        Some(holder) => holder.user_id == viewer_id,
        None => true,
    }
}
