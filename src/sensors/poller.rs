use std::{sync::Arc, time::Duration};

use tokio::time;
use tracing::{error, info, warn};

use super::{lookup_all, SensorGateway};
use crate::{
    reading_cache::ReadingCache,
    store::{ReservationStore, StoreResult},
};

/// Periodically pulls every device state in one bulk call, refreshes the
/// shared cache and appends a history row per sensor-equipped room.
pub struct OccupancyPoller {
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn SensorGateway>,
    cache: ReadingCache,
    bulk_timeout: Duration,
    interval: Duration,
}

impl OccupancyPoller {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn SensorGateway>,
        cache: ReadingCache,
        bulk_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            cache,
            bulk_timeout,
            interval,
        }
    }

    /// Runs the polling loop indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Occupancy polling loop started");
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Occupancy poll failed");
            }
        }
    }

    /// One poll. Returns the number of history rows written.
    pub async fn poll_once(&self) -> StoreResult<usize> {
        let rooms = self.store.list_rooms().await?;
        let equipped: Vec<_> = rooms
            .iter()
            .filter_map(|room| room.sensor_device().map(|device| (room, device)))
            .collect();

        if equipped.is_empty() {
            info!("No sensor-equipped rooms; skipping occupancy poll");
            return Ok(0);
        }

        let states = lookup_all(self.gateway.as_ref(), self.bulk_timeout).await;

        let mut recorded = 0;
        for (room, device_id) in equipped {
            let Some(state) = states.get(device_id) else {
                warn!(room_number = %room.room_number, device_id = %device_id, "No reading for device");
                continue;
            };

            self.cache.update(state.clone()).await;
            self.store
                .record_occupancy(&room.room_number, state.occupied, state.raw.clone())
                .await?;
            recorded += 1;
        }

        let cached = self.cache.len().await;
        info!(recorded, cached, "Occupancy poll complete");
        Ok(recorded)
    }
}
