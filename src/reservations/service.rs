use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::NaiveDate;
use tracing::{info, warn};

use super::validator::{self, first_conflict, Rejection};
use crate::{
    db::models::{DateRange, NewReservation, Reservation, ReservationStatus, Room, User},
    error::{ServiceError, ServiceResult},
    store::{ReservationStore, StoreError},
};

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub room_number: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub notes: String,
}

/// Reserve / cancel / sweep on top of a [`ReservationStore`].
///
/// Validation and the insert it guards run under a per-room async mutex, so
/// two requests for the same room never interleave their check-then-act.
/// The store's own constraints cover the cross-room case (one live
/// reservation per user).
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    room_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self {
            store,
            room_locks: Arc::default(),
        }
    }

    fn room_lock(&self, room_number: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .room_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(room_number.to_owned()).or_default().clone()
    }

    pub async fn reserve(
        &self,
        requester: &User,
        request: BookingRequest,
        today: NaiveDate,
    ) -> ServiceResult<Reservation> {
        let room = self
            .store
            .find_room(&request.room_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("room {}", request.room_number)))?;

        let lock = self.room_lock(&room.room_number);
        let _guard = lock.lock().await;

        let held = self.store.live_reservation_for_user(requester.id).await?;
        let existing = self
            .store
            .live_guest_reservations_for_room(&room.room_number)
            .await?;

        let range = validator::validate(
            requester,
            &room,
            request.check_in,
            request.check_out,
            today,
            held.as_ref(),
            &existing,
        )?;

        let inserted = self
            .store
            .insert_reservation(NewReservation {
                user_id: requester.id,
                room_number: room.room_number.clone(),
                check_in: Some(range.check_in),
                check_out: Some(range.check_out),
                notes: request.notes,
            })
            .await;

        match inserted {
            Ok(reservation) => {
                info!(
                    reservation_id = reservation.id,
                    room_number = %reservation.room_number,
                    user = %requester.username,
                    check_in = %range.check_in,
                    check_out = %range.check_out,
                    "Room reserved"
                );
                Ok(reservation)
            }
            Err(StoreError::DateConflict(_)) => {
                warn!(room_number = %room.room_number, "Booking lost a race at the store; reporting conflict");
                Err(self.conflict_after_race(&room, &range).await?.into())
            }
            Err(StoreError::LiveReservationExists) => {
                warn!(user = %requester.username, "Second live reservation refused by the store");
                match self.store.live_reservation_for_user(requester.id).await? {
                    Some(held) => Err(Rejection::already_holds(&held).into()),
                    None => Err(StoreError::LiveReservationExists.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-read the room so the rejection names the booking that won.
    async fn conflict_after_race(&self, room: &Room, range: &DateRange) -> ServiceResult<Rejection> {
        let existing = self
            .store
            .live_guest_reservations_for_room(&room.room_number)
            .await?;

        Ok(match first_conflict(&room.room_number, range, &existing) {
            Some(winner) => Rejection::conflicts_with(winner),
            None => Rejection::DateConflict {
                room_number: room.room_number.clone(),
                check_in: Some(range.check_in),
                check_out: Some(range.check_out),
            },
        })
    }

    /// Cancel a live reservation. Owners may cancel their own; managers may
    /// cancel any. Expired stays are swept first, so a reservation whose
    /// check-out has passed ends up `Completed` rather than `Cancelled`.
    pub async fn cancel(
        &self,
        requester: &User,
        reservation_id: i64,
        today: NaiveDate,
    ) -> ServiceResult<Reservation> {
        self.sweep(today).await?;

        let reservation = self
            .store
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("reservation {reservation_id}")))?;

        if !requester.role.is_manager() && reservation.user_id != requester.id {
            return Err(ServiceError::PermissionDenied(
                "you do not have permission to cancel this reservation".to_owned(),
            ));
        }

        if !reservation.is_live() {
            return Err(ServiceError::NotCancellable {
                id: reservation.id,
                status: reservation.status,
            });
        }

        let lock = self.room_lock(&reservation.room_number);
        let _guard = lock.lock().await;

        let cancelled = self
            .store
            .set_status(reservation.id, ReservationStatus::Cancelled)
            .await
            .map_err(|e| match e {
                StoreError::NotLive { id, status } => ServiceError::NotCancellable { id, status },
                other => other.into(),
            })?;

        info!(
            reservation_id = cancelled.id,
            room_number = %cancelled.room_number,
            by = %requester.username,
            "Reservation cancelled"
        );
        Ok(cancelled)
    }

    /// Complete every live reservation that checked out before `today`.
    /// Safe to call on every read.
    pub async fn sweep(&self, today: NaiveDate) -> ServiceResult<u64> {
        let completed = self.store.complete_expired(today).await?;
        if completed > 0 {
            info!(completed, today = %today, "Expired reservations marked completed");
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::{NewRoom, NewUser, Role},
        store::MemoryStore,
    };

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    const TODAY: &str = "2024-01-01";

    struct Fixture {
        store: MemoryStore,
        service: ReservationService,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = MemoryStore::new();
            for number in ["101", "102"] {
                store
                    .provision_room(NewRoom {
                        room_number: number.into(),
                        iot_device_id: None,
                    })
                    .await
                    .unwrap();
            }
            let service = ReservationService::new(Arc::new(store.clone()));
            Self { store, service }
        }

        async fn user(&self, name: &str, role: Role) -> User {
            self.store
                .create_user(NewUser {
                    username: name.into(),
                    email: format!("{name}@example.com"),
                    role,
                })
                .await
                .unwrap()
        }

        async fn reserve(&self, user: &User, room: &str, from: &str, to: &str) -> ServiceResult<Reservation> {
            self.service
                .reserve(
                    user,
                    BookingRequest {
                        room_number: room.into(),
                        check_in: d(from),
                        check_out: d(to),
                        notes: String::new(),
                    },
                    d(TODAY),
                )
                .await
        }
    }

    fn rejection(err: ServiceError) -> Rejection {
        match err {
            ServiceError::Rejected(r) => r,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlapping_second_booking_is_rejected() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;

        let first = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();
        assert_eq!(first.status, ReservationStatus::Reserved);

        let err = fx.reserve(&bob, "101", "2024-01-12", "2024-01-20").await.unwrap_err();
        assert_eq!(rejection(err).code(), "date_conflict");
    }

    #[tokio::test]
    async fn back_to_back_booking_succeeds() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;

        fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();
        fx.reserve(&bob, "101", "2024-01-20", "2024-01-25").await.unwrap();
    }

    #[tokio::test]
    async fn second_booking_by_same_user_names_held_room() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;

        fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();
        let err = fx.reserve(&alice, "102", "2024-02-10", "2024-02-15").await.unwrap_err();
        assert!(matches!(
            rejection(err),
            Rejection::AlreadyHasReservation { room_number, .. } if room_number == "101"
        ));
    }

    #[tokio::test]
    async fn manager_cannot_reserve() {
        let fx = Fixture::new().await;
        let boss = fx.user("boss", Role::Manager).await;
        let err = fx.reserve(&boss, "101", "2024-01-10", "2024-01-15").await.unwrap_err();
        assert_eq!(rejection(err), Rejection::RoleNotAllowed);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let err = fx.reserve(&alice, "999", "2024-01-10", "2024-01-15").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_overlapping_bookings_admit_exactly_one() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;

        let (a, b) = tokio::join!(
            fx.reserve(&alice, "101", "2024-01-10", "2024-01-15"),
            fx.reserve(&bob, "101", "2024-01-12", "2024-01-18"),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let live = fx.store.live_guest_reservations_for_room("101").await.unwrap();
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn cancel_frees_the_room_for_others() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;

        let booking = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();
        let cancelled = fx.service.cancel(&alice, booking.id, d(TODAY)).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        fx.reserve(&bob, "101", "2024-01-10", "2024-01-15").await.unwrap();
        // Alice is free to book again.
        fx.reserve(&alice, "102", "2024-01-10", "2024-01-15").await.unwrap();
    }

    #[tokio::test]
    async fn only_owner_or_manager_may_cancel() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;
        let boss = fx.user("boss", Role::Manager).await;

        let booking = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();

        let err = fx.service.cancel(&bob, booking.id, d(TODAY)).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        fx.service.cancel(&boss, booking.id, d(TODAY)).await.unwrap();
    }

    #[tokio::test]
    async fn cancelling_twice_is_refused() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let booking = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();

        fx.service.cancel(&alice, booking.id, d(TODAY)).await.unwrap();
        let err = fx.service.cancel(&alice, booking.id, d(TODAY)).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NotCancellable { status: ReservationStatus::Cancelled, .. }
        ));

        let err = fx.service.cancel(&alice, 4242, d(TODAY)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_past_checkout_completes_instead() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let booking = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();

        let err = fx.service.cancel(&alice, booking.id, d("2024-01-16")).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NotCancellable { status: ReservationStatus::Completed, .. }
        ));

        let stored = fx.store.find_reservation(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_loses_to_a_concurrent_completion() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let booking = fx.reserve(&alice, "101", "2024-01-10", "2024-01-15").await.unwrap();
        fx.store.complete_expired(d("2024-01-16")).await.unwrap();

        let err = fx
            .store
            .set_status(booking.id, ReservationStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotLive { status: ReservationStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn sweep_completes_only_past_checkouts() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice", Role::Normal).await;
        let bob = fx.user("bob", Role::Normal).await;

        let past = fx.reserve(&alice, "101", "2024-01-25", "2024-01-30").await.unwrap();
        fx.store
            .set_status(past.id, ReservationStatus::Active)
            .await
            .unwrap();
        let ongoing = fx.reserve(&bob, "102", "2024-01-28", "2024-02-05").await.unwrap();

        assert_eq!(fx.service.sweep(d("2024-02-01")).await.unwrap(), 1);
        assert_eq!(fx.service.sweep(d("2024-02-01")).await.unwrap(), 0);

        let past = fx.store.find_reservation(past.id).await.unwrap().unwrap();
        let ongoing = fx.store.find_reservation(ongoing.id).await.unwrap().unwrap();
        assert_eq!(past.status, ReservationStatus::Completed);
        assert_eq!(ongoing.status, ReservationStatus::Reserved);
    }

    #[tokio::test]
    async fn sweep_on_empty_store_is_a_no_op() {
        let fx = Fixture::new().await;
        assert_eq!(fx.service.sweep(d(TODAY)).await.unwrap(), 0);
    }
}
