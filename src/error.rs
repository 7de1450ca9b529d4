use thiserror::Error;

use crate::{db::models::ReservationStatus, reservations::Rejection, store::StoreError};

/// Errors surfaced by the reservation and occupancy services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("reservation {id} is {status} and cannot be cancelled")]
    NotCancellable { id: i64, status: ReservationStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
