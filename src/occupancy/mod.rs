//! Per-room occupancy for a given day: a covering reservation first, the
//! room's sensor as fallback, and how the result is shown to a viewer.

pub mod display;
pub mod resolver;

pub use display::{can_select, upcoming_booking, RoomColor};
pub use resolver::{covering_reservation, Occupancy, OccupancyResolver, ReservedBy};
