use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{Reservation, Room},
    sensors::{self, DeviceState, SensorError, SensorGateway},
    store::{ReservationStore, StoreResult},
};

/// The guest holding a room today.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReservedBy {
    pub reservation_id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
}

/// Resolved state of one room on one day.
///
/// At most one of `reserved_by` and `sensor_reading` is set: a covering
/// reservation always wins and the sensor is never consulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct Occupancy {
    pub occupied: bool,
    pub reserved_by: Option<ReservedBy>,
    pub sensor_reading: Option<DeviceState>,
}

impl Occupancy {
    pub fn from_reservation(reservation: &Reservation) -> Self {
        Self {
            occupied: true,
            reserved_by: Some(ReservedBy {
                reservation_id: reservation.id,
                user_id: reservation.user_id,
                username: reservation.username.clone(),
                check_in: reservation.check_in,
                check_out: reservation.check_out,
            }),
            sensor_reading: None,
        }
    }

    pub fn from_reading(state: DeviceState) -> Self {
        Self {
            occupied: state.occupied,
            reserved_by: None,
            sensor_reading: Some(state),
        }
    }

    pub fn is_held_by(&self, user_id: Uuid) -> bool {
        self.reserved_by
            .as_ref()
            .is_some_and(|holder| holder.user_id == user_id)
    }
}

/// The live guest reservation holding `room_number` on `today`.
///
/// On a turnover day the departing and arriving stays both cover `today`;
/// the lower id wins. Any other multiple match means the no-overlap
/// invariant was broken upstream and is logged.
pub fn covering_reservation<'a>(
    room_number: &str,
    reservations: &'a [Reservation],
    today: NaiveDate,
) -> Option<&'a Reservation> {
    let covering: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| {
            r.room_number == room_number
                && r.is_live()
                && !r.user_role.is_manager()
                && r.covers(today)
        })
        .collect();

    let chosen = *covering.iter().min_by_key(|r| r.id)?;

    let clashing = covering
        .iter()
        .filter(|r| r.id != chosen.id && !is_turnover(chosen, r))
        .count();
    if clashing > 0 {
        error!(
            room_number = %room_number,
            today = %today,
            covering = covering.len(),
            chosen = chosen.id,
            "Overlapping live reservations cover the same day"
        );
    }
    Some(chosen)
}

/// Dated stays that only touch at a check-out/check-in day.
fn is_turnover(a: &Reservation, b: &Reservation) -> bool {
    match (a.range(), b.range()) {
        (Some(a), Some(b)) => !a.overlaps(&b),
        _ => false,
    }
}

/// Decides whether rooms are occupied, preferring reservations over sensor
/// readings. Sensor trouble is logged and read as "unoccupied".
#[derive(Clone)]
pub struct OccupancyResolver {
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn SensorGateway>,
    timeout: Duration,
    bulk_timeout: Duration,
}

impl OccupancyResolver {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn SensorGateway>,
        timeout: Duration,
        bulk_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            timeout,
            bulk_timeout,
        }
    }

    pub async fn resolve(&self, room: &Room, today: NaiveDate) -> StoreResult<Occupancy> {
        let reservations = self
            .store
            .live_guest_reservations_for_room(&room.room_number)
            .await?;
        Ok(self.resolve_with(room, today, &reservations).await)
    }

    /// Resolve against reservations the caller already loaded.
    pub async fn resolve_with(
        &self,
        room: &Room,
        today: NaiveDate,
        reservations: &[Reservation],
    ) -> Occupancy {
        if let Some(reservation) = covering_reservation(&room.room_number, reservations, today) {
            return Occupancy::from_reservation(reservation);
        }

        let Some(device_id) = room.sensor_device() else {
            return Occupancy::default();
        };

        let reading = sensors::lookup(self.gateway.as_ref(), device_id, self.timeout).await;
        from_lookup(room, device_id, reading)
    }

    /// Resolve several rooms with a single reservation query. When two or
    /// more rooms fall back to their sensors, one bulk lookup replaces the
    /// per-device calls.
    pub async fn resolve_many(&self, rooms: &[Room], today: NaiveDate) -> StoreResult<Vec<Occupancy>> {
        let reservations = self.store.live_guest_reservations().await?;

        let mut resolved: Vec<Option<Occupancy>> = rooms
            .iter()
            .map(|room| {
                covering_reservation(&room.room_number, &reservations, today)
                    .map(Occupancy::from_reservation)
            })
            .collect();

        let pending: Vec<(usize, &str)> = rooms
            .iter()
            .enumerate()
            .filter(|(i, _)| resolved[*i].is_none())
            .filter_map(|(i, room)| room.sensor_device().map(|device| (i, device)))
            .collect();

        match pending.as_slice() {
            [] => {}
            [(i, device_id)] => {
                let reading = sensors::lookup(self.gateway.as_ref(), device_id, self.timeout).await;
                resolved[*i] = Some(from_lookup(&rooms[*i], device_id, reading));
            }
            _ => {
                let mut states: HashMap<String, DeviceState> =
                    sensors::lookup_all(self.gateway.as_ref(), self.bulk_timeout).await;
                for (i, device_id) in &pending {
                    resolved[*i] = states.remove(*device_id).map(Occupancy::from_reading);
                }
            }
        }

        Ok(resolved.into_iter().map(Option::unwrap_or_default).collect())
    }
}

fn from_lookup(
    room: &Room,
    device_id: &str,
    reading: Result<Option<DeviceState>, SensorError>,
) -> Occupancy {
    match reading {
        Ok(Some(state)) => Occupancy::from_reading(state),
        Ok(None) => {
            debug!(room_number = %room.room_number, device_id = %device_id, "Sensor has no record");
            Occupancy::default()
        }
        Err(e) => {
            warn!(
                room_number = %room.room_number,
                device_id = %device_id,
                error = %e,
                "Sensor unavailable; treating room as unoccupied"
            );
            Occupancy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::Utc;

    use super::*;
    use crate::{
        db::models::{NewReservation, NewRoom, NewUser, ReservationStatus, Role, User},
        reservations::{BookingRequest, ReservationService},
        sensors::testing::{FailingGateway, FixedGateway, HangingGateway},
        store::MemoryStore,
    };

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn store_with(rooms: &[(&str, Option<&str>)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (number, device) in rooms {
            store
                .provision_room(NewRoom {
                    room_number: (*number).into(),
                    iot_device_id: device.map(str::to_owned),
                })
                .await
                .unwrap();
        }
        store
    }

    async fn guest(store: &MemoryStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.into(),
                email: format!("{name}@example.com"),
                role: Role::Normal,
            })
            .await
            .unwrap()
    }

    fn resolver(store: &MemoryStore, gateway: Arc<dyn SensorGateway>) -> OccupancyResolver {
        OccupancyResolver::new(
            Arc::new(store.clone()),
            gateway,
            Duration::from_millis(100),
            Duration::from_millis(300),
        )
    }

    async fn room(store: &MemoryStore, number: &str) -> Room {
        store.find_room(number).await.unwrap().unwrap()
    }

    fn row(id: i64, check_in: Option<&str>, check_out: Option<&str>) -> Reservation {
        Reservation {
            id,
            user_id: Uuid::new_v4(),
            username: format!("guest{id}"),
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
    fn covering_includes_both_boundary_days() {
        let rows = [row(1, Some("2024-01-10"), Some("2024-01-15"))];
        assert!(covering_reservation("101", &rows, d("2024-01-10")).is_some());
        assert!(covering_reservation("101", &rows, d("2024-01-15")).is_some());
        assert!(covering_reservation("101", &rows, d("2024-01-16")).is_none());
        assert!(covering_reservation("101", &rows, d("2024-01-09")).is_none());
    }

    #[test]
    fn undated_reservation_covers_every_day() {
        let rows = [row(1, None, None)];
        assert!(covering_reservation("101", &rows, d("1999-12-31")).is_some());
    }

    #[test]
    fn duplicate_cover_picks_lowest_id() {
        let rows = [
            row(9, Some("2024-01-01"), Some("2024-01-31")),
            row(4, None, None),
            row(7, Some("2024-01-05"), Some("2024-01-06")),
        ];
        let chosen = covering_reservation("101", &rows, d("2024-01-05")).unwrap();
        assert_eq!(chosen.id, 4);
    }

    #[test]
    fn turnover_day_goes_to_lower_id() {
        let rows = [
            row(5, Some("2024-01-15"), Some("2024-01-20")),
            row(3, Some("2024-01-10"), Some("2024-01-15")),
        ];
        assert_eq!(covering_reservation("101", &rows, d("2024-01-15")).unwrap().id, 3);
        assert_eq!(covering_reservation("101", &rows, d("2024-01-16")).unwrap().id, 5);
    }

    #[test]
    fn manager_and_terminal_rows_never_cover() {
        let mut manager = row(1, None, None);
        manager.user_role = Role::Manager;
        let mut done = row(2, None, None);
        done.status = ReservationStatus::Completed;
        assert!(covering_reservation("101", &[manager, done], d("2024-01-05")).is_none());
    }

    #[tokio::test]
    async fn covering_reservation_wins_without_asking_sensor() {
        let store = store_with(&[("101", Some("dev-101"))]).await;
        let alice = guest(&store, "alice").await;
        store
            .insert_reservation(NewReservation {
                user_id: alice.id,
                room_number: "101".into(),
                check_in: Some(d("2024-01-10")),
                check_out: Some(d("2024-01-15")),
                notes: String::new(),
            })
            .await
            .unwrap();
        let gateway = FixedGateway::with("dev-101", false);
        let probe = gateway.clone();

        let occupancy = resolver(&store, Arc::new(gateway))
            .resolve(&room(&store, "101").await, d("2024-01-12"))
            .await
            .unwrap();

        assert!(occupancy.occupied);
        assert!(occupancy.is_held_by(alice.id));
        assert_eq!(occupancy.sensor_reading, None);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn sensor_reading_is_used_when_no_reservation_covers_today() {
        let store = store_with(&[("101", Some("dev-101"))]).await;
        let alice = guest(&store, "alice").await;
        store
            .insert_reservation(NewReservation {
                user_id: alice.id,
                room_number: "101".into(),
                check_in: Some(d("2024-02-01")),
                check_out: Some(d("2024-02-03")),
                notes: String::new(),
            })
            .await
            .unwrap();

        let occupancy = resolver(&store, Arc::new(FixedGateway::with("dev-101", true)))
            .resolve(&room(&store, "101").await, d("2024-01-12"))
            .await
            .unwrap();

        assert!(occupancy.occupied);
        assert_eq!(occupancy.reserved_by, None);
        assert_eq!(occupancy.sensor_reading.unwrap().device_id, "dev-101");
    }

    #[tokio::test]
    async fn hanging_sensor_fails_open_within_bound() {
        let store = store_with(&[("101", Some("dev-101"))]).await;
        let started = Instant::now();

        let occupancy = resolver(&store, Arc::new(HangingGateway))
            .resolve(&room(&store, "101").await, d("2024-01-12"))
            .await
            .unwrap();

        assert_eq!(occupancy, Occupancy::default());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failing_sensor_reads_as_unoccupied() {
        let store = store_with(&[("101", Some("dev-101"))]).await;

        let occupancy = resolver(&store, Arc::new(FailingGateway))
            .resolve(&room(&store, "101").await, d("2024-01-12"))
            .await
            .unwrap();

        assert!(!occupancy.occupied);
        assert_eq!(occupancy.sensor_reading, None);
    }

    #[tokio::test]
    async fn room_without_device_is_free_without_lookup() {
        let store = store_with(&[("101", None)]).await;
        let gateway = FixedGateway::default();
        let probe = gateway.clone();

        let occupancy = resolver(&store, Arc::new(gateway))
            .resolve(&room(&store, "101").await, d("2024-01-12"))
            .await
            .unwrap();

        assert_eq!(occupancy, Occupancy::default());
        assert_eq!(probe.calls() + probe.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_booking_frees_the_room_immediately() {
        let store = store_with(&[("101", None)]).await;
        let alice = guest(&store, "alice").await;
        let service = ReservationService::new(Arc::new(store.clone()));
        let booking = service
            .reserve(
                &alice,
                BookingRequest {
                    room_number: "101".into(),
                    check_in: d("2024-01-10"),
                    check_out: d("2024-01-15"),
                    notes: String::new(),
                },
                d("2024-01-01"),
            )
            .await
            .unwrap();
        let resolver = resolver(&store, Arc::new(FixedGateway::default()));
        let room = room(&store, "101").await;

        assert!(resolver.resolve(&room, d("2024-01-12")).await.unwrap().occupied);

        service.cancel(&alice, booking.id, d("2024-01-01")).await.unwrap();

        for day in ["2024-01-10", "2024-01-12", "2024-01-15"] {
            assert!(!resolver.resolve(&room, d(day)).await.unwrap().occupied);
        }
    }

    #[tokio::test]
    async fn many_rooms_share_one_bulk_lookup() {
        let store = store_with(&[
            ("101", Some("dev-101")),
            ("102", Some("dev-102")),
            ("103", Some("dev-103")),
            ("104", None),
        ])
        .await;
        let mut gateway = FixedGateway::with("dev-101", true);
        gateway.insert("dev-102", false);
        let probe = gateway.clone();
        let rooms = store.list_rooms().await.unwrap();

        let resolved = resolver(&store, Arc::new(gateway))
            .resolve_many(&rooms, d("2024-01-12"))
            .await
            .unwrap();

        assert_eq!(probe.bulk_calls(), 1);
        assert_eq!(probe.calls(), 0);
        let occupied: Vec<bool> = resolved.iter().map(|o| o.occupied).collect();
        assert_eq!(occupied, [true, false, false, false]);
        assert!(resolved[2].sensor_reading.is_none());
    }

    #[tokio::test]
    async fn single_sensor_room_uses_single_lookup() {
        let store = store_with(&[("101", Some("dev-101")), ("102", None)]).await;
        let gateway = FixedGateway::with("dev-101", true);
        let probe = gateway.clone();
        let rooms = store.list_rooms().await.unwrap();

        let resolved = resolver(&store, Arc::new(gateway))
            .resolve_many(&rooms, d("2024-01-12"))
            .await
            .unwrap();

        assert_eq!((probe.calls(), probe.bulk_calls()), (1, 0));
        assert!(resolved[0].occupied);
    }

    #[tokio::test]
    async fn hanging_bulk_lookup_fails_open() {
        let store = store_with(&[("101", Some("dev-101")), ("102", Some("dev-102"))]).await;
        let rooms = store.list_rooms().await.unwrap();
        let started = Instant::now();

        let resolved = resolver(&store, Arc::new(HangingGateway))
            .resolve_many(&rooms, d("2024-01-12"))
            .await
            .unwrap();

        assert!(resolved.iter().all(|o| !o.occupied));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
