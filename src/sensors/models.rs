use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Device payloads
//
// The realtime database stores one JSON object per device, written by the
// sensor firmware. Observed shapes:
//
//   /devices/{id}  { "occupied": true,  "timestamp": 1700000000, ... }
//   /rooms/{id}    { "is_occupied": 1,  "timestamp": "2024-01-10T08:00:00Z", ... }
//
// Either flag may be present; anything truthy counts as occupied. A missing
// record reads back as JSON `null`.
// ---------------------------------------------------------------------------

/// Latest reported state of one occupancy sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceState {
    pub device_id: String,
    pub occupied: bool,
    /// Reporting time as written by the device, in whatever format it uses.
    #[schema(value_type = Option<Object>)]
    pub timestamp: Option<Value>,
    /// Full payload as stored by the backend.
    #[schema(value_type = Object)]
    pub raw: Value,
}

impl DeviceState {
    /// Interpret a stored payload. `None` for `null` and empty records.
    pub fn from_payload(device_id: &str, raw: Value) -> Option<Self> {
        if !is_truthy(&raw) {
            return None;
        }

        let flag = |key: &str| raw.get(key).is_some_and(is_truthy);
        let occupied = flag("occupied") || flag("is_occupied");
        let timestamp = raw.get("timestamp").filter(|t| !t.is_null()).cloned();

        Some(Self {
            device_id: device_id.to_owned(),
            occupied,
            timestamp,
            raw,
        })
    }
}

/// JSON truthiness as the firmware writers use it: `false`, `0`, `""`,
/// `null`, `[]` and `{}` are false.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
