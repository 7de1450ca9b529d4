pub mod service;
pub mod validator;

pub use service::{BookingRequest, ReservationService};
pub use validator::{validate, Rejection};
