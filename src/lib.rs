pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod occupancy;
pub mod reading_cache;
pub mod reservations;
pub mod sensors;
pub mod store;
