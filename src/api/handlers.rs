use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;

use super::{
    auth::CurrentUser,
    dto::{
        BoardRoomDto, DashboardResponse, ReservationBoardResponse, ReservationDto, ReserveRequest,
        RoomDetailResponse, RoomDto, RoomStatusDto, SignupRequest, UserDto,
    },
    errors::AppError,
    AppState,
};
use crate::{
    db::models::{NewUser, OccupancyRecord, Role, Room, User},
    error::ServiceError,
    occupancy::{can_select, upcoming_booking, Occupancy, ReservedBy, RoomColor},
    reservations::BookingRequest,
    sensors::DeviceState,
};

/// Number of history records returned with a room's detail.
const HISTORY_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Create an account. Usernames are unique.
#[utoipa::path(
    post,
    path = "/accounts/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = UserDto),
        (status = 400, description = "Missing username or malformed email"),
        (status = 409, description = "Username already taken"),
    ),
    tag = "accounts"
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<UserDto>), AppError> {
    let username = req.username.trim();
    let email = req.email.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username must not be empty".to_owned()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest(format!("invalid email address: {email:?}")));
    }

    let user = state
        .store
        .create_user(NewUser {
            username: username.to_owned(),
            email: email.to_owned(),
            role: req.role,
        })
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, role = ?user.role, "Account created");
    Ok((StatusCode::CREATED, Json(user.into())))
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Rooms visible to the caller with their occupancy and colour.
#[utoipa::path(
    get,
    path = "/dashboard",
    params(("x-user-id" = String, Header, description = "Caller's account id (UUID)")),
    responses(
        (status = 200, description = "Visible rooms", body = DashboardResponse),
        (status = 401, description = "Unknown caller"),
    ),
    tag = "rooms"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<DashboardResponse>, AppError> {
    let today = state.clock.today();
    state.reservations.sweep(today).await?;

    let rooms = if user.role.is_manager() {
        state.store.list_rooms().await?
    } else {
        match state.store.live_reservation_for_user(user.id).await? {
            Some(held) => state.store.find_room(&held.room_number).await?.into_iter().collect(),
            None => Vec::new(),
        }
    };

    let occupancies = state.resolver.resolve_many(&rooms, today).await?;
    let rooms = rooms
        .into_iter()
        .zip(occupancies)
        .map(|(room, occupancy)| RoomStatusDto::new(room, occupancy, user.id))
        .collect();

    Ok(Json(DashboardResponse {
        is_manager: user.role.is_manager(),
        rooms,
    }))
}

/// Room detail: occupancy, live reservations and recent history.
#[utoipa::path(
    get,
    path = "/rooms/{room_number}",
    params(
        ("room_number" = String, Path, description = "Room number"),
        ("x-user-id" = String, Header, description = "Caller's account id (UUID)"),
    ),
    responses(
        (status = 200, description = "Room detail", body = RoomDetailResponse),
        (status = 403, description = "Caller holds no reservation on this room"),
        (status = 404, description = "No such room"),
    ),
    tag = "rooms"
)]
pub async fn room_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(room_number): Path<String>,
) -> Result<Json<RoomDetailResponse>, AppError> {
    let today = state.clock.today();
    state.reservations.sweep(today).await?;

    let room = visible_room(&state, &user, &room_number).await?;

    let mut reservations = state
        .store
        .live_guest_reservations_for_room(&room.room_number)
        .await?;
    reservations.sort_by_key(|r| (r.check_in, r.id));

    let occupancy = state.resolver.resolve_with(&room, today, &reservations).await;
    let history: Vec<OccupancyRecord> = state
        .store
        .occupancy_history(&room.room_number, HISTORY_LIMIT)
        .await?;
    let last_polled = match room.sensor_device() {
        Some(device_id) => state.cache.get(device_id).await,
        None => None,
    };

    Ok(Json(RoomDetailResponse {
        status: RoomStatusDto::new(room, occupancy, user.id),
        reservations: reservations.into_iter().map(Into::into).collect(),
        history,
        last_polled,
    }))
}

/// Current occupancy of one room.
#[utoipa::path(
    get,
    path = "/rooms/{room_number}/occupancy",
    params(
        ("room_number" = String, Path, description = "Room number"),
        ("x-user-id" = String, Header, description = "Caller's account id (UUID)"),
    ),
    responses(
        (status = 200, description = "Occupancy for today", body = Occupancy),
        (status = 403, description = "Caller holds no reservation on this room"),
        (status = 404, description = "No such room"),
    ),
    tag = "rooms"
)]
pub async fn room_occupancy(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(room_number): Path<String>,
) -> Result<Json<Occupancy>, AppError> {
    let today = state.clock.today();
    state.reservations.sweep(today).await?;

    let room = visible_room(&state, &user, &room_number).await?;
    Ok(Json(state.resolver.resolve(&room, today).await?))
}

/// Managers see every room; guests only the room their live reservation
/// holds.
async fn visible_room(state: &AppState, user: &User, room_number: &str) -> Result<Room, AppError> {
    let room = state
        .store
        .find_room(room_number)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room {room_number}")))?;

    if user.role.is_manager() {
        return Ok(room);
    }

    let holds_room = state
        .store
        .live_reservation_for_user(user.id)
        .await?
        .is_some_and(|held| held.room_number == room.room_number);

    if holds_room {
        Ok(room)
    } else {
        Err(ServiceError::PermissionDenied("you do not have permission to view this room".to_owned()).into())
    }
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// Every room with availability, for choosing a booking.
#[utoipa::path(
    get,
    path = "/reservations",
    params(("x-user-id" = String, Header, description = "Caller's account id (UUID)")),
    responses(
        (status = 200, description = "Reservation board", body = ReservationBoardResponse),
        (status = 401, description = "Unknown caller"),
    ),
    tag = "reservations"
)]
pub async fn reservation_board(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ReservationBoardResponse>, AppError> {
    let today = state.clock.today();
    state.reservations.sweep(today).await?;

    let is_manager = user.role.is_manager();
    let rooms = state.store.list_rooms().await?;
    let reservations = state.store.live_guest_reservations().await?;
    let occupancies = state.resolver.resolve_many(&rooms, today).await?;

    let own_reservation = if is_manager {
        None
    } else {
        state.store.live_reservation_for_user(user.id).await?
    };

    let rooms = rooms
        .into_iter()
        .zip(occupancies)
        .map(|(room, occupancy)| {
            let upcoming = match occupancy.reserved_by {
                Some(_) => None,
                None => upcoming_booking(&room.room_number, &reservations, today)
                    .cloned()
                    .map(Into::into),
            };
            BoardRoomDto {
                can_select: !is_manager && can_select(&occupancy, user.id),
                upcoming,
                status: RoomStatusDto::new(room, occupancy, user.id),
            }
        })
        .collect();

    Ok(Json(ReservationBoardResponse {
        is_manager,
        own_reservation: own_reservation.map(Into::into),
        rooms,
    }))
}

/// Reserve a room for `[check_in, check_out]`.
#[utoipa::path(
    post,
    path = "/rooms/{room_number}/reserve",
    request_body = ReserveRequest,
    params(
        ("room_number" = String, Path, description = "Room number"),
        ("x-user-id" = String, Header, description = "Caller's account id (UUID)"),
    ),
    responses(
        (status = 201, description = "Reservation created", body = ReservationDto),
        (status = 404, description = "No such room"),
        (status = 409, description = "Dates taken or caller already holds a reservation"),
        (status = 422, description = "Manager caller, past check-in or empty range"),
    ),
    tag = "reservations"
)]
pub async fn reserve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(room_number): Path<String>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationDto>), AppError> {
    let today = state.clock.today();
    state.reservations.sweep(today).await?;

    let reservation = state
        .reservations
        .reserve(
            &user,
            BookingRequest {
                room_number,
                check_in: req.check_in,
                check_out: req.check_out,
                notes: req.notes,
            },
            today,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// Cancel a live reservation (owner or manager).
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    params(
        ("id" = i64, Path, description = "Reservation id"),
        ("x-user-id" = String, Header, description = "Caller's account id (UUID)"),
    ),
    responses(
        (status = 200, description = "Reservation cancelled", body = ReservationDto),
        (status = 403, description = "Not the owner and not a manager"),
        (status = 404, description = "No such reservation"),
        (status = 409, description = "Reservation already completed or cancelled"),
    ),
    tag = "reservations"
)]
pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ReservationDto>, AppError> {
    let cancelled = state.reservations.cancel(&user, id, state.clock.today()).await?;
    Ok(Json(cancelled.into()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        signup,
        dashboard,
        room_detail,
        room_occupancy,
        reservation_board,
        reserve,
        cancel,
        health
    ),
    components(schemas(
        SignupRequest,
        UserDto,
        Role,
        ReserveRequest,
        ReservationDto,
        RoomDto,
        RoomStatusDto,
        DashboardResponse,
        RoomDetailResponse,
        BoardRoomDto,
        ReservationBoardResponse,
        Occupancy,
        ReservedBy,
        RoomColor,
        DeviceState,
        OccupancyRecord,
    )),
    tags(
        (name = "accounts",     description = "Account endpoints"),
        (name = "rooms",        description = "Room occupancy endpoints"),
        (name = "reservations", description = "Reservation endpoints"),
        (name = "system",       description = "System endpoints"),
    ),
    info(
        title = "Room Occupancy Service API",
        version = "0.1.0",
        description = "REST API for room reservations and sensor-backed occupancy"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
