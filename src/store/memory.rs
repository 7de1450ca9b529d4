use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Provisioned, ReservationStore, StoreError, StoreResult};
use crate::db::models::{
    DateRange, NewReservation, NewRoom, NewUser, OccupancyRecord, Reservation, ReservationStatus,
    Room, User,
};

/// In-process store used by tests and by `STORE_BACKEND=memory`.
///
/// Cheap to clone; clones share the same state. All invariant checks and
/// the write they guard happen under one write lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    rooms: BTreeMap<String, Room>,
    users: HashMap<Uuid, User>,
    reservations: BTreeMap<i64, Reservation>,
    occupancy: Vec<OccupancyRecord>,
    next_reservation_id: i64,
    next_occupancy_id: i64,
}

impl State {
    fn live_guest(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .values()
            .filter(|r| r.is_live() && !r.user_role.is_manager())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        Ok(self.inner.read().await.rooms.values().cloned().collect())
    }

    async fn find_room(&self, room_number: &str) -> StoreResult<Option<Room>> {
        Ok(self.inner.read().await.rooms.get(room_number).cloned())
    }

    async fn provision_room(&self, room: NewRoom) -> StoreResult<Provisioned> {
        let mut state = self.inner.write().await;
        let now = Utc::now();

        match state.rooms.get_mut(&room.room_number) {
            None => {
                state.rooms.insert(
                    room.room_number.clone(),
                    Room {
                        has_iot_device: room.iot_device_id.is_some(),
                        iot_device_id: room.iot_device_id,
                        room_number: room.room_number,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(Provisioned::Created)
            }
            Some(existing) => match room.iot_device_id {
                Some(device_id) if !existing.has_iot_device => {
                    existing.has_iot_device = true;
                    existing.iot_device_id = Some(device_id);
                    existing.updated_at = now;
                    Ok(Provisioned::Updated)
                }
                _ => Ok(Provisioned::Unchanged),
            },
        }
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.inner.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate(format!("user {}", user.username)));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<Reservation> {
        let mut state = self.inner.write().await;

        let owner = state
            .users
            .get(&new.user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", new.user_id)))?;
        if !state.rooms.contains_key(&new.room_number) {
            return Err(StoreError::NotFound(format!("room {}", new.room_number)));
        }

        if state
            .reservations
            .values()
            .any(|r| r.is_live() && r.user_id == new.user_id)
        {
            return Err(StoreError::LiveReservationExists);
        }

        // Same predicate as the `reservations_no_overlap` constraint, limited
        // to guest rows the way the validator counts them.
        let requested = Reservation {
            id: 0,
            user_id: owner.id,
            username: owner.username,
            user_role: owner.role,
            room_number: new.room_number,
            status: ReservationStatus::Reserved,
            reserved_at: Utc::now(),
            check_in: new.check_in,
            check_out: new.check_out,
            notes: new.notes,
        };
        let span = requested
            .range()
            .unwrap_or(DateRange::new(NaiveDate::MIN, NaiveDate::MAX));
        let collides = state
            .live_guest()
            .any(|r| r.room_number == requested.room_number && r.blocks(&span));
        if collides {
            return Err(StoreError::DateConflict(requested.room_number));
        }

        state.next_reservation_id += 1;
        let reservation = Reservation {
            id: state.next_reservation_id,
            ..requested
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn find_reservation(&self, id: i64) -> StoreResult<Option<Reservation>> {
        Ok(self.inner.read().await.reservations.get(&id).cloned())
    }

    async fn live_reservation_for_user(&self, user_id: Uuid) -> StoreResult<Option<Reservation>> {
        Ok(self
            .inner
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.is_live() && r.user_id == user_id)
            .max_by_key(|r| (r.reserved_at, r.id))
            .cloned())
    }

    async fn live_guest_reservations_for_room(
        &self,
        room_number: &str,
    ) -> StoreResult<Vec<Reservation>> {
        Ok(self
            .inner
            .read()
            .await
            .live_guest()
            .filter(|r| r.room_number == room_number)
            .cloned()
            .collect())
    }

    async fn live_guest_reservations(&self) -> StoreResult<Vec<Reservation>> {
        Ok(self.inner.read().await.live_guest().cloned().collect())
    }

    async fn set_status(&self, id: i64, status: ReservationStatus) -> StoreResult<Reservation> {
        let mut state = self.inner.write().await;
        let reservation = state
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;
        if !reservation.is_live() {
            return Err(StoreError::NotLive {
                id,
                status: reservation.status,
            });
        }
        reservation.status = status;
        Ok(reservation.clone())
    }

    async fn complete_expired(&self, today: NaiveDate) -> StoreResult<u64> {
        let mut state = self.inner.write().await;
        let mut completed = 0;
        for reservation in state.reservations.values_mut() {
            if reservation.is_live() && reservation.is_expired(today) {
                reservation.status = ReservationStatus::Completed;
                completed += 1;
            }
        }
        Ok(completed)
    }

    async fn record_occupancy(
        &self,
        room_number: &str,
        occupied: bool,
        sensor_data: serde_json::Value,
    ) -> StoreResult<OccupancyRecord> {
        let mut state = self.inner.write().await;
        if !state.rooms.contains_key(room_number) {
            return Err(StoreError::NotFound(format!("room {room_number}")));
        }

        state.next_occupancy_id += 1;
        let record = OccupancyRecord {
            id: state.next_occupancy_id,
            room_number: room_number.to_owned(),
            occupied,
            recorded_at: Utc::now(),
            sensor_data,
        };
        state.occupancy.push(record.clone());
        Ok(record)
    }

    async fn occupancy_history(
        &self,
        room_number: &str,
        limit: i64,
    ) -> StoreResult<Vec<OccupancyRecord>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .inner
            .read()
            .await
            .occupancy
            .iter()
            .rev()
            .filter(|r| r.room_number == room_number)
            .take(limit)
            .cloned()
            .collect())
    }
}
