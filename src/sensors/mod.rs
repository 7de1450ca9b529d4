//! Sensor gateway: best-effort, time-bounded lookups of per-device
//! occupancy against the IoT backend.
//!
//! Every call goes through [`lookup`] or [`lookup_all`], which put a hard
//! timeout around the gateway so a slow or dead backend can never stall a
//! request.

pub mod firebase;
pub mod models;
pub mod poller;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time;
use tracing::warn;

pub use firebase::RealtimeDbClient;
pub use models::DeviceState;
pub use poller::OccupancyPoller;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor gateway did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("sensor gateway request failed: {0:#}")]
    Failed(#[source] anyhow::Error),
}

#[async_trait]
pub trait SensorGateway: Send + Sync {
    /// Current state of one device; `Ok(None)` when the backend has no
    /// record for it.
    async fn device_state(&self, device_id: &str) -> anyhow::Result<Option<DeviceState>>;

    /// Current state of every device the backend knows about.
    async fn all_device_states(&self) -> anyhow::Result<HashMap<String, DeviceState>>;
}

/// Gateway used when no IoT backend is configured: knows no devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

#[async_trait]
impl SensorGateway for Disconnected {
    async fn device_state(&self, _device_id: &str) -> anyhow::Result<Option<DeviceState>> {
        Ok(None)
    }

    async fn all_device_states(&self) -> anyhow::Result<HashMap<String, DeviceState>> {
        Ok(HashMap::new())
    }
}

/// Query one device, giving up after `timeout`.
pub async fn lookup(
    gateway: &dyn SensorGateway,
    device_id: &str,
    timeout: Duration,
) -> Result<Option<DeviceState>, SensorError> {
    match time::timeout(timeout, gateway.device_state(device_id)).await {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) => Err(SensorError::Failed(e)),
        Err(_) => Err(SensorError::TimedOut(timeout)),
    }
}

/// Query every device, giving up after `timeout`. Degrades to an empty map
/// on any failure; the failure is logged, never returned.
pub async fn lookup_all(gateway: &dyn SensorGateway, timeout: Duration) -> HashMap<String, DeviceState> {
    let result = match time::timeout(timeout, gateway.all_device_states()).await {
        Ok(Ok(states)) => return states,
        Ok(Err(e)) => SensorError::Failed(e),
        Err(_) => SensorError::TimedOut(timeout),
    };
    warn!(error = %result, "Bulk sensor lookup unavailable; continuing without readings");
    HashMap::new()
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::{testing::*, *};

    #[tokio::test]
    async fn lookup_returns_known_state() {
        let gateway = FixedGateway::with("101", true);
        let state = lookup(&gateway, "101", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(state.occupied);
        assert!(lookup(&gateway, "999", Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_times_out_within_bound() {
        let started = Instant::now();
        let err = lookup(&HangingGateway, "101", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn lookup_surfaces_failure_as_typed_error() {
        let err = lookup(&FailingGateway, "101", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Failed(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn lookup_all_degrades_to_empty_map() {
        assert!(lookup_all(&FailingGateway, Duration::from_secs(1)).await.is_empty());
        assert!(lookup_all(&HangingGateway, Duration::from_millis(50)).await.is_empty());
    }

    #[tokio::test]
    async fn disconnected_gateway_knows_nothing() {
        assert!(lookup(&Disconnected, "101", Duration::from_secs(1)).await.unwrap().is_none());
        assert!(lookup_all(&Disconnected, Duration::from_secs(1)).await.is_empty());
    }
}
