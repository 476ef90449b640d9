//! Device registry lookup.

use crate::config::BridgeSettings;
use meshbridge_core::{Device, DeviceId};
use std::collections::HashMap;

/// Resolves protocol addresses to known devices.
pub trait DeviceRegistry {
    /// Look up a device by address.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Unknown`] if the device is not registered.
    fn lookup_device(&self, id: &DeviceId) -> Result<Device, LookupError>;
}

impl<R: DeviceRegistry + ?Sized> DeviceRegistry for &R {
    fn lookup_device(&self, id: &DeviceId) -> Result<Device, LookupError> {
        (**self).lookup_device(id)
    }
}

/// Device lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// No device registered under this address
    #[error("device {0} is not registered")]
    Unknown(DeviceId),
}

/// In-memory registry built from the `devices` configuration section.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: HashMap<DeviceId, Device>,
}

impl DeviceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configuration.
    #[must_use]
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        let mut table = Self::new();
        table.reload(settings);
        table
    }

    /// Replace the configured devices, keeping model IDs learned from traffic
    /// for devices whose configuration does not name one.
    ///
    /// Returns the devices that are no longer registered, sorted.
    pub fn reload(&mut self, settings: &BridgeSettings) -> Vec<DeviceId> {
        let previous = std::mem::take(&mut self.devices);

        for (addr, cfg) in &settings.devices {
            let id = DeviceId::new(addr.as_str());
            let model_id = cfg
                .model_id
                .clone()
                .or_else(|| previous.get(&id).map(|d| d.model_id.clone()))
                .unwrap_or_default();

            let device = Device::new(id.clone(), cfg.friendly_name.clone(), model_id)
                .with_retain(cfg.retain);
            self.devices.insert(id, device);
        }

        let mut removed: Vec<DeviceId> = previous
            .into_keys()
            .filter(|id| !self.devices.contains_key(id))
            .collect();
        removed.sort();

        tracing::debug!(
            devices = self.devices.len(),
            removed = removed.len(),
            "Device table loaded"
        );
        removed
    }

    /// Register a device, replacing any previous entry.
    pub fn insert(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    /// Record the model ID reported by the decoder for a registered device
    /// that does not have one yet.
    pub fn note_model(&mut self, id: &DeviceId, model_id: &str) {
        if model_id.is_empty() {
            return;
        }
        if let Some(device) = self.devices.get_mut(id) {
            if device.model_id.is_empty() {
                tracing::debug!(device_id = %id, model_id, "Learned device model");
                device.model_id = model_id.to_string();
            }
        }
    }

    /// Whether a device is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceRegistry for DeviceTable {
    fn lookup_device(&self, id: &DeviceId) -> Result<Device, LookupError> {
        self.devices
            .get(id)
            .cloned()
            .ok_or_else(|| LookupError::Unknown(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;

    fn settings() -> BridgeSettings {
        let mut settings = BridgeSettings::default();
        settings.devices.insert(
            "0x12345678".to_string(),
            DeviceSettings {
                friendly_name: "test".to_string(),
                retain: true,
                model_id: None,
            },
        );
        settings.devices.insert(
            "0x87654321".to_string(),
            DeviceSettings {
                friendly_name: "hall_sensor".to_string(),
                retain: false,
                model_id: Some("lumi.sensor_motion".to_string()),
            },
        );
        settings
    }

    #[test]
    fn lookup_configured_devices() {
        let table = DeviceTable::from_settings(&settings());
        assert_eq!(table.len(), 2);

        let device = table.lookup_device(&DeviceId::new("0x12345678")).unwrap();
        assert_eq!(device.friendly_name, "test");
        assert!(device.retain);
        assert_eq!(device.model_id, "");

        let sensor = table.lookup_device(&DeviceId::new("0x87654321")).unwrap();
        assert_eq!(sensor.model_id, "lumi.sensor_motion");
    }

    #[test]
    fn unknown_device() {
        let table = DeviceTable::from_settings(&settings());
        let id = DeviceId::new("0xffff");
        assert_eq!(table.lookup_device(&id), Err(LookupError::Unknown(id)));
    }

    #[test]
    fn learned_model_survives_reload() {
        let mut table = DeviceTable::from_settings(&settings());
        let id = DeviceId::new("0x12345678");

        table.note_model(&id, "TRADFRI bulb E27 CWS opal 600lm");
        table.note_model(&id, "something else");
        table.reload(&settings());

        assert_eq!(
            table.lookup_device(&id).unwrap().model_id,
            "TRADFRI bulb E27 CWS opal 600lm"
        );
    }

    #[test]
    fn reload_drops_removed_devices() {
        let mut table = DeviceTable::from_settings(&settings());
        let mut fewer = settings();
        fewer.devices.remove("0x87654321");

        let removed = table.reload(&fewer);
        assert_eq!(removed, vec![DeviceId::new("0x87654321")]);
        assert!(!table.contains(&DeviceId::new("0x87654321")));
        assert!(table.contains(&DeviceId::new("0x12345678")));
        assert!(table.reload(&fewer).is_empty());
    }
}
