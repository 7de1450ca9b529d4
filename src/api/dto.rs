use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{OccupancyRecord, Reservation, ReservationStatus, Role, Room, User},
    occupancy::{Occupancy, RoomColor},
    sensors::DeviceState,
};

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Request body for `POST /accounts/signup`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    /// Defaults to `normal`.
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            role: u.role,
            created_at: u.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// Request body for `POST /rooms/{room_number}/reserve`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveRequest {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReservationDto {
    pub id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub room_number: String,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub notes: String,
}

impl From<Reservation> for ReservationDto {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            username: r.username,
            room_number: r.room_number,
            status: r.status,
            reserved_at: r.reserved_at,
            check_in: r.check_in,
            check_out: r.check_out,
            notes: r.notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoomDto {
    pub room_number: String,
    pub has_iot_device: bool,
    pub iot_device_id: Option<String>,
}

impl From<Room> for RoomDto {
    fn from(r: Room) -> Self {
        Self {
            room_number: r.room_number,
            has_iot_device: r.has_iot_device,
            iot_device_id: r.iot_device_id,
        }
    }
}

/// One room as painted for the requesting user.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomStatusDto {
    pub room: RoomDto,
    pub occupancy: Occupancy,
    pub color: RoomColor,
    /// `green`, `yellow` or `white`.
    pub css_color: String,
}

impl RoomStatusDto {
    pub fn new(room: Room, occupancy: Occupancy, viewer_id: Uuid) -> Self {
        let color = RoomColor::for_viewer(&occupancy, viewer_id);
        Self {
            room: room.into(),
            occupancy,
            color,
            css_color: color.css().to_owned(),
        }
    }
}

/// Response for `GET /dashboard`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub is_manager: bool,
    /// Managers see every room; guests only the room they hold.
    pub rooms: Vec<RoomStatusDto>,
}

/// Response for `GET /rooms/{room_number}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomDetailResponse {
    pub status: RoomStatusDto,
    /// Live guest reservations on the room, earliest check-in first.
    pub reservations: Vec<ReservationDto>,
    /// Most recent history records, newest first.
    pub history: Vec<OccupancyRecord>,
    /// Last state seen by the background poller, if any.
    pub last_polled: Option<DeviceState>,
}

/// One room on the reservation board.
#[derive(Debug, Serialize, ToSchema)]
pub struct BoardRoomDto {
    #[serde(flatten)]
    pub status: RoomStatusDto,
    pub can_select: bool,
    /// Earliest future booking, shown while no booking covers today.
    pub upcoming: Option<ReservationDto>,
}

/// Response for `GET /reservations`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationBoardResponse {
    pub is_manager: bool,
    pub own_reservation: Option<ReservationDto>,
    pub rooms: Vec<BoardRoomDto>,
}
