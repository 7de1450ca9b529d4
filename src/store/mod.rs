//! Persistence boundary for rooms, accounts, reservations and occupancy
//! history.
//!
//! Both implementations enforce the two booking invariants at write time
//! (one live reservation per user, no overlapping live stays per room) so
//! that a race past the validator surfaces as a typed error instead of a
//! double booking.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db::models::{
    NewReservation, NewRoom, NewUser, OccupancyRecord, Reservation, ReservationStatus, Room, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user already holds a live reservation")]
    LiveReservationExists,

    #[error("room {0} is already booked for overlapping dates")]
    DateConflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("reservation {id} is {status}")]
    NotLive { id: i64, status: ReservationStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of provisioning a single room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    /// An existing room gained its sensor device.
    Updated,
    Unchanged,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// All rooms ordered by room number.
    async fn list_rooms(&self) -> StoreResult<Vec<Room>>;

    async fn find_room(&self, room_number: &str) -> StoreResult<Option<Room>>;

    /// Create the room if missing; attach the device to an existing room
    /// that has none. Anything else is left as is.
    async fn provision_room(&self, room: NewRoom) -> StoreResult<Provisioned>;

    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Persist a new reservation in `Reserved` state.
    async fn insert_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation>;

    async fn find_reservation(&self, id: i64) -> StoreResult<Option<Reservation>>;

    /// The user's most recent reservation in `{Reserved, Active}`.
    async fn live_reservation_for_user(&self, user_id: Uuid) -> StoreResult<Option<Reservation>>;

    /// Live reservations on one room owned by non-managers, ordered by id.
    async fn live_guest_reservations_for_room(
        &self,
        room_number: &str,
    ) -> StoreResult<Vec<Reservation>>;

    /// Live reservations on every room owned by non-managers, ordered by id.
    async fn live_guest_reservations(&self) -> StoreResult<Vec<Reservation>>;

    /// Move a live reservation to `status`. A reservation that is already
    /// completed or cancelled is left alone and reported as
    /// [`StoreError::NotLive`].
    async fn set_status(&self, id: i64, status: ReservationStatus) -> StoreResult<Reservation>;

    /// Move every live reservation whose check-out is strictly before
    /// `today` to `Completed`. Returns the number of rows changed.
    async fn complete_expired(&self, today: NaiveDate) -> StoreResult<u64>;

    async fn record_occupancy(
        &self,
        room_number: &str,
        occupied: bool,
        sensor_data: serde_json::Value,
    ) -> StoreResult<OccupancyRecord>;

    /// Newest first.
    async fn occupancy_history(
        &self,
        room_number: &str,
        limit: i64,
    ) -> StoreResult<Vec<OccupancyRecord>>;
}

/// Provision every configured room, returning `(created, updated)` counts.
pub async fn provision_rooms(
    store: &dyn ReservationStore,
    rooms: &[NewRoom],
) -> StoreResult<(usize, usize)> {
    let mut created = 0;
    let mut updated = 0;

    for room in rooms {
        match store.provision_room(room.clone()).await? {
            Provisioned::Created => created += 1,
            Provisioned::Updated => {
                info!(room_number = %room.room_number, "Attached sensor device to existing room");
                updated += 1;
            }
            Provisioned::Unchanged => {}
        }
    }

    info!(created, updated, total = rooms.len(), "Rooms provisioned");
    Ok((created, updated))
}
