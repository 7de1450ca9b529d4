use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{Provisioned, ReservationStore, StoreError, StoreResult};
use crate::db::models::{
    NewReservation, NewRoom, NewUser, OccupancyRecord, Reservation, ReservationStatus, Room, User,
};

/// Reservation columns joined with the owner's name and role.
const RESERVATION_SELECT: &str = r#"
    SELECT r.id,
           r.user_id,
           u.username,
           u.role AS user_role,
           r.room_number,
           r.status,
           r.reserved_at,
           r.check_in,
           r.check_out,
           r.notes
    FROM reservations r
    JOIN users u ON u.id = r.user_id
"#;

const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const SERIALIZATION_FAILURE: &str = "40001";
const ONE_LIVE_PER_USER: &str = "reservations_one_live_per_user";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        let rows = sqlx::query_as::<_, Room>(
            r#"
            SELECT room_number, has_iot_device, iot_device_id, created_at, updated_at
            FROM rooms
            ORDER BY room_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_room(&self, room_number: &str) -> StoreResult<Option<Room>> {
        let row = sqlx::query_as::<_, Room>(
            r#"
            SELECT room_number, has_iot_device, iot_device_id, created_at, updated_at
            FROM rooms
            WHERE room_number = $1
            "#,
        )
        .bind(room_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn provision_room(&self, room: NewRoom) -> StoreResult<Provisioned> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO rooms (room_number, has_iot_device, iot_device_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (room_number) DO NOTHING
            "#,
        )
        .bind(&room.room_number)
        .bind(room.iot_device_id.is_some())
        .bind(&room.iot_device_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(Provisioned::Created);
        }

        let Some(device_id) = room.iot_device_id else {
            return Ok(Provisioned::Unchanged);
        };

        let updated = sqlx::query(
            r#"
            UPDATE rooms
            SET has_iot_device = TRUE, iot_device_id = $2, updated_at = now()
            WHERE room_number = $1 AND NOT has_iot_device
            "#,
        )
        .bind(&room.room_number)
        .bind(device_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(if updated > 0 {
            Provisioned::Updated
        } else {
            Provisioned::Unchanged
        })
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, role)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, role, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation_code(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::Duplicate(format!("user {}", user.username)),
            _ => StoreError::Database(e),
        })
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, email, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            WITH inserted AS (
                INSERT INTO reservations (user_id, room_number, status, check_in, check_out, notes)
                VALUES ($1, $2, 'reserved', $3, $4, $5)
                RETURNING *
            )
            SELECT i.id,
                   i.user_id,
                   u.username,
                   u.role AS user_role,
                   i.room_number,
                   i.status,
                   i.reserved_at,
                   i.check_in,
                   i.check_out,
                   i.notes
            FROM inserted i
            JOIN users u ON u.id = i.user_id
            "#,
        )
        .bind(new.user_id)
        .bind(&new.room_number)
        .bind(new.check_in)
        .bind(new.check_out)
        .bind(&new.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_booking_error(e, &new))?;

        tx.commit().await.map_err(|e| map_booking_error(e, &new))?;

        debug!(reservation_id = reservation.id, room_number = %reservation.room_number, "Reservation row inserted");
        Ok(reservation)
    }

    async fn find_reservation(&self, id: i64) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, Reservation>(&format!("{RESERVATION_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn live_reservation_for_user(&self, user_id: Uuid) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, Reservation>(&format!(
            "{RESERVATION_SELECT}
             WHERE r.user_id = $1 AND r.status IN ('reserved', 'active')
             ORDER BY r.reserved_at DESC, r.id DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn live_guest_reservations_for_room(
        &self,
        room_number: &str,
    ) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(&format!(
            "{RESERVATION_SELECT}
             WHERE r.room_number = $1
               AND r.status IN ('reserved', 'active')
               AND u.role <> 'manager'
             ORDER BY r.id"
        ))
        .bind(room_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn live_guest_reservations(&self) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(&format!(
            "{RESERVATION_SELECT}
             WHERE r.status IN ('reserved', 'active')
               AND u.role <> 'manager'
             ORDER BY r.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_status(&self, id: i64, status: ReservationStatus) -> StoreResult<Reservation> {
        let updated = sqlx::query(
            "UPDATE reservations SET status = $2 WHERE id = $1 AND status IN ('reserved', 'active')",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(match self.find_reservation(id).await? {
                Some(current) => StoreError::NotLive {
                    id,
                    status: current.status,
                },
                None => StoreError::NotFound(format!("reservation {id}")),
            });
        }

        self.find_reservation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))
    }

    async fn complete_expired(&self, today: NaiveDate) -> StoreResult<u64> {
        let completed = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'completed'
            WHERE status IN ('reserved', 'active')
              AND check_out IS NOT NULL
              AND check_out < $1
            "#,
        )
        .bind(today)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(completed)
    }

    async fn record_occupancy(
        &self,
        room_number: &str,
        occupied: bool,
        sensor_data: serde_json::Value,
    ) -> StoreResult<OccupancyRecord> {
        sqlx::query_as::<_, OccupancyRecord>(
            r#"
            INSERT INTO occupancy_readings (room_number, occupied, sensor_data)
            VALUES ($1, $2, $3)
            RETURNING id, room_number, occupied, recorded_at, sensor_data
            "#,
        )
        .bind(room_number)
        .bind(occupied)
        .bind(sensor_data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation_code(&e).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound(format!("room {room_number}")),
            _ => StoreError::Database(e),
        })
    }

    async fn occupancy_history(
        &self,
        room_number: &str,
        limit: i64,
    ) -> StoreResult<Vec<OccupancyRecord>> {
        let rows = sqlx::query_as::<_, OccupancyRecord>(
            r#"
            SELECT id, room_number, occupied, recorded_at, sensor_data
            FROM occupancy_readings
            WHERE room_number = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(room_number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn violation_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// A concurrent SERIALIZABLE booking committed first. The loser's retry would
/// see the winner, so it is reported the same way as an exclusion violation.
fn is_serialization_failure(code: Option<&str>) -> bool {
    code == Some(SERIALIZATION_FAILURE)
}

/// Translate constraint violations raised by a concurrent booking into the
/// same errors the in-memory checks produce.
fn map_booking_error(e: sqlx::Error, new: &NewReservation) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some(EXCLUSION_VIOLATION) => {
                return StoreError::DateConflict(new.room_number.clone());
            }
            code if is_serialization_failure(code) => {
                return StoreError::DateConflict(new.room_number.clone());
            }
            Some(UNIQUE_VIOLATION) if db.constraint() == Some(ONE_LIVE_PER_USER) => {
                return StoreError::LiveReservationExists;
            }
            Some(FOREIGN_KEY_VIOLATION) => {
                return StoreError::NotFound(format!(
                    "room {} or user {}",
                    new.room_number, new.user_id
                ));
            }
            _ => {}
        }
    }
    StoreError::Database(e)
}
