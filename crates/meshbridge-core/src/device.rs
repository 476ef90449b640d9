//! Device identity and normalized device events.

use crate::value::AttrMap;
use serde::{Deserialize, Serialize};

/// Stable protocol address of a device (e.g. `0x00158d0001a2b3c4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A device as known to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Protocol address
    pub id: DeviceId,
    /// User-assigned name, used to build bus topics
    pub friendly_name: String,
    /// Model identifier reported by the device
    #[serde(default)]
    pub model_id: String,
    /// Whether publications for this device are retained by the broker
    #[serde(default, skip_serializing)]
    pub retain: bool,
}

impl Device {
    /// Create a device without the retain flag.
    #[must_use]
    pub fn new(
        id: impl Into<DeviceId>,
        friendly_name: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            model_id: model_id.into(),
            retain: false,
        }
    }

    /// Set the retain flag.
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// A partial set of attribute changes produced by one protocol event.
pub type StateDelta = AttrMap;

/// A decoded attribute change for one device, as handed over by the protocol decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Device identity as reported by the decoder
    pub device: Device,
    /// Changed attributes
    pub delta: StateDelta,
}

impl NormalizedEvent {
    /// Create an event.
    #[must_use]
    pub fn new(device: Device, delta: StateDelta) -> Self {
        Self { device, delta }
    }
}
