//! Device metadata enrichment for aggregate payloads.

use meshbridge_core::{AttrMap, AttrValue, Device};

/// Reserved payload key holding device metadata.
pub const DEVICE_INFO_KEY: &str = "device";

/// Whether device identity is attached to outgoing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceInfo {
    /// Pass state through unchanged
    #[default]
    Disabled,
    /// Attach `{id, friendlyName, modelId}` under [`DEVICE_INFO_KEY`]
    Enabled,
}

impl DeviceInfo {
    /// Variant for the `include_device_information` setting.
    #[must_use]
    pub fn from_flag(include: bool) -> Self {
        if include {
            DeviceInfo::Enabled
        } else {
            DeviceInfo::Disabled
        }
    }

    /// Apply to a merged state.
    ///
    /// The metadata is appended after the state keys, so it serializes last.
    #[must_use]
    pub fn attach(self, mut state: AttrMap, device: &Device) -> AttrMap {
        if self == DeviceInfo::Enabled {
            state.insert(DEVICE_INFO_KEY, metadata(device));
        }
        state
    }
}

fn metadata(device: &Device) -> AttrValue {
    let info: AttrMap = [
        ("id", device.id.as_str()),
        ("friendlyName", device.friendly_name.as_str()),
        ("modelId", device.model_id.as_str()),
    ]
    .into_iter()
    .collect();
    AttrValue::Map(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new("0x12345678", "test", "TRADFRI bulb E27 CWS opal 600lm")
    }

    #[test]
    fn disabled_passes_through() {
        let state: AttrMap = [("state", "ON")].into_iter().collect();
        assert_eq!(DeviceInfo::Disabled.attach(state.clone(), &device()), state);
    }

    #[test]
    fn enabled_appends_metadata_last() {
        let state: AttrMap = [("state", "ON")].into_iter().collect();
        let enriched = DeviceInfo::Enabled.attach(state, &device());

        assert_eq!(enriched.keys().collect::<Vec<_>>(), vec!["state", "device"]);
        let json = serde_json::to_string(&enriched.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"state":"ON","device":{"id":"0x12345678","friendlyName":"test","modelId":"TRADFRI bulb E27 CWS opal 600lm"}}"#
        );
    }
}
