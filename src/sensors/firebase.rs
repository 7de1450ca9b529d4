use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

use super::{models::DeviceState, SensorGateway};

/// REST client for the realtime database the room sensors report into.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct RealtimeDbClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RealtimeDbClient {
    /// `request_timeout` caps every HTTP call; callers layer their own,
    /// usually shorter, bound on top via [`super::lookup`].
    pub fn new(base_url: &str, auth_token: Option<String>, request_timeout: Duration) -> Result<Self> {
        // Validate once up front so a typo fails start-up, not every request.
        Url::parse(base_url).with_context(|| format!("invalid SENSOR_BASE_URL: {base_url:?}"))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build sensor HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_owned(),
                auth_token,
            }),
        })
    }

    /// `{base}/{path}.json`, with the `auth` query parameter when configured.
    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}.json", self.inner.base_url, path.trim_matches('/'));
        let mut url = Url::parse(&raw).with_context(|| format!("invalid sensor URL: {raw:?}"))?;
        if let Some(token) = &self.inner.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    /// GET a node and return its JSON value (`null` when absent).
    async fn get_node(&self, path: &str) -> Result<Value> {
        let url = self.url(path)?;
        debug!(path = %path, "Fetching sensor node");

        let bytes = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("sensor request for {path} failed"))?
            .error_for_status()
            .with_context(|| format!("sensor backend returned error status for {path}"))?
            .bytes()
            .await
            .with_context(|| format!("failed to read sensor response body for {path}"))?;

        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to deserialize sensor response for {path}"))
    }
}

#[async_trait]
impl SensorGateway for RealtimeDbClient {
    /// Devices live under `/devices/{id}`; older firmware writes to
    /// `/rooms/{id}` instead, which is tried second.
    async fn device_state(&self, device_id: &str) -> Result<Option<DeviceState>> {
        for prefix in ["devices", "rooms"] {
            let raw = self.get_node(&format!("{prefix}/{device_id}")).await?;
            if let Some(state) = DeviceState::from_payload(device_id, raw) {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    /// Same precedence as [`Self::device_state`]: a device found under
    /// `/devices` hides any `/rooms` record of the same id.
    async fn all_device_states(&self) -> Result<HashMap<String, DeviceState>> {
        let (devices, rooms) = tokio::try_join!(self.get_node("devices"), self.get_node("rooms"))?;
        Ok(merge_listings(devices, rooms))
    }
}

fn merge_listings(devices: Value, rooms: Value) -> HashMap<String, DeviceState> {
    let mut states = states_from_listing(rooms);
    states.extend(states_from_listing(devices));
    states
}

/// Interpret the `/devices` listing (`{ id: payload, ... }`).
fn states_from_listing(raw: Value) -> HashMap<String, DeviceState> {
    match raw {
        Value::Object(devices) => devices
            .into_iter()
            .filter_map(|(id, payload)| {
                DeviceState::from_payload(&id, payload).map(|state| (id, state))
            })
            .collect(),
        _ => HashMap::new(),
    }
}
