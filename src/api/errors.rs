use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use crate::{error::ServiceError, reservations::Rejection, store::StoreError};

#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or unknown `X-User-Id`.
    Unauthenticated(&'static str),
    BadRequest(String),
    Service(ServiceError),
}

impl AppError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Service(e) => match e {
                ServiceError::Rejected(r) => (rejection_status(r), r.code()),
                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ServiceError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
                ServiceError::NotCancellable { .. } => (StatusCode::CONFLICT, "not_cancellable"),
                ServiceError::Store(store) => match store {
                    StoreError::LiveReservationExists => {
                        (StatusCode::CONFLICT, "already_has_reservation")
                    }
                    StoreError::DateConflict(_) => (StatusCode::CONFLICT, "date_conflict"),
                    StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    StoreError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                    StoreError::NotLive { .. } => (StatusCode::CONFLICT, "not_cancellable"),
                    StoreError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                },
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg) => (*msg).to_owned(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Service(e) => e.to_string(),
        }
    }
}

/// Structured payload for rejections that name what they collided with.
fn rejection_detail(rejection: &Rejection) -> Option<Value> {
    match rejection {
        Rejection::AlreadyHasReservation {
            room_number,
            reservation_id,
        } => Some(json!({ "room_number": room_number, "reservation_id": reservation_id })),
        Rejection::DateConflict {
            room_number,
            check_in,
            check_out,
        } => Some(json!({ "room_number": room_number, "check_in": check_in, "check_out": check_out })),
        _ => None,
    }
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::DateConflict { .. } | Rejection::AlreadyHasReservation { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();

        let message = if status.is_server_error() {
            error!(error = %self.message(), "Request failed");
            "internal server error".to_owned()
        } else {
            self.message()
        };

        let mut body = json!({ "error": message, "reason": reason });
        if let AppError::Service(ServiceError::Rejected(rejection)) = &self {
            if let Some(detail) = rejection_detail(rejection) {
                body["detail"] = detail;
            }
        }
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Service(ServiceError::Store(e))
    }
}
