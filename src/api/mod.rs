pub mod auth;
pub mod dto;
pub mod errors;
pub mod handlers;

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    clock::Clock,
    occupancy::OccupancyResolver,
    reading_cache::ReadingCache,
    reservations::ReservationService,
    sensors::SensorGateway,
    store::ReservationStore,
};
use handlers::ApiDoc;

/// Everything a handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReservationStore>,
    pub reservations: ReservationService,
    pub resolver: OccupancyResolver,
    pub cache: ReadingCache,
    pub clock: Clock,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn SensorGateway>,
        cache: ReadingCache,
        clock: Clock,
        sensor_timeout: Duration,
        sensor_bulk_timeout: Duration,
    ) -> Self {
        Self {
            reservations: ReservationService::new(store.clone()),
            resolver: OccupancyResolver::new(
                store.clone(),
                gateway,
                sensor_timeout,
                sensor_bulk_timeout,
            ),
            store,
            cache,
            clock,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/accounts/signup", post(handlers::signup))
        .route("/dashboard", get(handlers::dashboard))
        .route("/rooms/{room_number}", get(handlers::room_detail))
        .route("/rooms/{room_number}/occupancy", get(handlers::room_occupancy))
        .route("/reservations", get(handlers::reservation_board))
        .route("/rooms/{room_number}/reserve", post(handlers::reserve))
        .route("/reservations/{id}/cancel", post(handlers::cancel))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
