use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::sensors::DeviceState;

/// In-memory store of the most recently polled `DeviceState` per device.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<String, DeviceState>>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cached state for `state.device_id`.
    pub async fn update(&self, state: DeviceState) {
        self.inner
            .write()
            .await
            .insert(state.device_id.clone(), state);
    }

    /// Return the last polled state for `device_id`, if any poll has seen it.
    pub async fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.read().await.get(device_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
