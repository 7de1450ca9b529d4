use std::{
    collections::{BTreeMap, HashSet},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};

use crate::db::models::NewRoom;

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

/// Where rooms, accounts and reservations are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local; everything is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown store backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required for [`StoreBackend::Postgres`].
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Realtime database base URL. Unset disables sensor lookups.
    pub sensor_base_url: Option<String>,
    pub sensor_auth_token: Option<String>,
    /// Bound on a single-device lookup.
    pub sensor_timeout: Duration,
    /// Bound on an all-devices lookup.
    pub sensor_bulk_timeout: Duration,
    /// Occupancy history polling interval in seconds. `0` disables polling.
    pub poll_interval_secs: u64,
    /// Rooms to provision at start-up, with their sensor devices attached.
    pub rooms: Vec<NewRoom>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_backend = optional("STORE_BACKEND", "postgres")
            .parse::<StoreBackend>()
            .context("STORE_BACKEND must be 'postgres' or 'memory'")?;

        let database_url = match store_backend {
            StoreBackend::Postgres => Some(required("DATABASE_URL")?),
            StoreBackend::Memory => non_empty("DATABASE_URL"),
        };

        let room_numbers = parse_rooms(&optional("ROOMS", "101-140"))?;
        let devices = parse_room_devices(&optional("ROOM_DEVICES", "101:101"))?;

        Ok(Self {
            store_backend,
            database_url,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            sensor_base_url: non_empty("SENSOR_BASE_URL"),
            sensor_auth_token: non_empty("SENSOR_AUTH_TOKEN"),
            sensor_timeout: millis("SENSOR_TIMEOUT_MS", "1000")?,
            sensor_bulk_timeout: millis("SENSOR_BULK_TIMEOUT_MS", "5000")?,
            poll_interval_secs: optional("POLL_INTERVAL_SECS", "60")
                .parse()
                .context("POLL_INTERVAL_SECS must be a non-negative integer")?,
            rooms: attach_devices(room_numbers, devices)?,
        })
    }
}

/// Parse `"101-105,201,203"` into room numbers, expanding inclusive ranges.
///
/// Numbers keep their textual form, so a range preserves zero padding only
/// if both ends share the same width.
fn parse_rooms(raw: &str) -> Result<Vec<String>> {
    let mut rooms = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (start.trim(), end.trim());
                let first: u32 = start
                    .parse()
                    .with_context(|| format!("ROOMS range start must be numeric, got: {entry:?}"))?;
                let last: u32 = end
                    .parse()
                    .with_context(|| format!("ROOMS range end must be numeric, got: {entry:?}"))?;
                anyhow::ensure!(first <= last, "ROOMS range is reversed: {entry:?}");

                let width = if start.len() == end.len() { start.len() } else { 0 };
                rooms.extend((first..=last).map(|n| format!("{n:0width$}")));
            }
            None => rooms.push(entry.to_owned()),
        }
    }

    // First occurrence wins; order is otherwise kept.
    let mut seen = HashSet::new();
    rooms.retain(|room| seen.insert(room.clone()));
    Ok(rooms)
}

/// Parse `"room:device,room:device"` into a room → device id map.
fn parse_room_devices(raw: &str) -> Result<BTreeMap<String, String>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let (room, device) = entry.split_once(':').with_context(|| {
                format!("ROOM_DEVICES entry must be 'room_number:device_id', got: {entry:?}")
            })?;
            let (room, device) = (room.trim(), device.trim());
            anyhow::ensure!(
                !room.is_empty() && !device.is_empty(),
                "ROOM_DEVICES entry has an empty side: {entry:?}"
            );
            Ok((room.to_owned(), device.to_owned()))
        })
        .collect()
}

fn attach_devices(
    room_numbers: Vec<String>,
    mut devices: BTreeMap<String, String>,
) -> Result<Vec<NewRoom>> {
    let rooms: Vec<NewRoom> = room_numbers
        .into_iter()
        .map(|room_number| NewRoom {
            iot_device_id: devices.remove(&room_number),
            room_number,
        })
        .collect();

    if let Some(unknown) = devices.keys().next() {
        anyhow::bail!("ROOM_DEVICES names room {unknown:?} which is not listed in ROOMS");
    }
    Ok(rooms)
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn millis(key: &str, default: &str) -> Result<Duration> {
    let ms: u64 = optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds"))?;
    anyhow::ensure!(ms > 0, "{key} must be greater than zero");
    Ok(Duration::from_millis(ms))
}
