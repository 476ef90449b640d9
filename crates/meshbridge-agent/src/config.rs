//! Bridge configuration.

use anyhow::{Context, Result};
use meshbridge_core::MergePolicy;
use meshbridge_proto::topics::{validate_friendly_name, TopicError};
use meshbridge_proto::{DeviceInfo, EncodingMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "./meshbridge.json";

/// Bridge configuration.
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Publish the full device state as one JSON message
    pub publish_as_json: bool,

    /// Publish one message per attribute on `{device}/{attribute}`
    pub publish_as_key_topics: bool,

    /// MQTT configuration
    pub mqtt: MqttSettings,

    /// Advanced configuration
    pub advanced: AdvancedSettings,

    /// Where decoded messages come from
    pub decoder: DecoderSettings,

    /// Known devices, keyed by IEEE address
    pub devices: BTreeMap<String, DeviceSettings>,
}

/// MQTT configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Topic prefix for every publication
    pub base_topic: String,

    /// MQTT broker URL
    pub server: String,

    /// Client identifier (generated when absent)
    pub client_id: Option<String>,

    /// Attach device metadata to JSON payloads
    pub include_device_information: bool,

    /// Keep-alive interval in seconds
    pub keepalive_secs: u64,
}

/// Advanced configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Merge deltas into cached device state
    pub cache_state: bool,

    /// Keep cached state across restarts
    pub cache_state_persistent: bool,

    /// `SQLite` database path for persisted state
    pub db_path: PathBuf,

    /// How often dirty state is written, in seconds
    pub state_save_interval_secs: u64,
}

/// Decoder input configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    /// Input source
    pub source: DecoderSource,

    /// Topic filter for the MQTT source
    pub topic: String,
}

/// Source of decoded Zigbee messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderSource {
    /// JSON lines on standard input
    #[default]
    Stdin,
    /// JSON messages on an MQTT topic
    Mqtt,
}

/// Per-device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// User-assigned name
    pub friendly_name: String,

    /// Retain publications for this device
    #[serde(default)]
    pub retain: bool,

    /// Model identifier, if known ahead of time
    #[serde(default)]
    pub model_id: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            publish_as_json: true,
            publish_as_key_topics: false,
            mqtt: MqttSettings::default(),
            advanced: AdvancedSettings::default(),
            decoder: DecoderSettings::default(),
            devices: BTreeMap::new(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            base_topic: "zigbee2mqtt".to_string(),
            server: "tcp://localhost:1883".to_string(),
            client_id: None,
            include_device_information: false,
            keepalive_secs: 60,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            cache_state: true,
            cache_state_persistent: true,
            db_path: PathBuf::from("./meshbridge-state.db"),
            state_save_interval_secs: 60,
        }
    }
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            source: DecoderSource::Stdin,
            topic: "meshbridge/decoded/#".to_string(),
        }
    }
}

impl BridgeSettings {
    /// Load configuration from the file named by `MESHBRIDGE_CONFIG` (or the
    /// default path), then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `MESHBRIDGE_CONFIG`: configuration file path
    /// - `MESHBRIDGE_MQTT_SERVER`: MQTT broker URL
    /// - `MESHBRIDGE_BASE_TOPIC`: topic prefix
    /// - `MESHBRIDGE_CLIENT_ID`: MQTT client identifier
    /// - `MESHBRIDGE_DB_PATH`: `SQLite` database path
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = std::env::var("MESHBRIDGE_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

        let mut settings = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Read configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid configuration JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server) = lookup("MESHBRIDGE_MQTT_SERVER") {
            self.mqtt.server = server;
        }

        if let Some(base_topic) = lookup("MESHBRIDGE_BASE_TOPIC") {
            self.mqtt.base_topic = base_topic;
        }

        if let Some(client_id) = lookup("MESHBRIDGE_CLIENT_ID") {
            self.mqtt.client_id = Some(client_id);
        }

        if let Some(db_path) = lookup("MESHBRIDGE_DB_PATH") {
            self.advanced.db_path = PathBuf::from(db_path);
        }
    }

    /// Check the configuration for settings that can never publish correctly.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoding_mode().is_none() {
            return Err(ConfigError::NoOutputEncoding);
        }

        for (id, device) in &self.devices {
            validate_friendly_name(&device.friendly_name).map_err(|source| {
                ConfigError::FriendlyName {
                    device: id.clone(),
                    source,
                }
            })?;
        }

        let mut seen = BTreeMap::new();
        for (id, device) in &self.devices {
            if let Some(other) = seen.insert(device.friendly_name.as_str(), id.as_str()) {
                return Err(ConfigError::DuplicateFriendlyName {
                    name: device.friendly_name.clone(),
                    first: other.to_string(),
                    second: id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Selected output encoding.
    #[must_use]
    pub fn encoding_mode(&self) -> Option<EncodingMode> {
        EncodingMode::from_flags(self.publish_as_json, self.publish_as_key_topics)
    }

    /// Device metadata enrichment.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::from_flag(self.mqtt.include_device_information)
    }

    /// How deltas are merged with cached state.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy::from_cache_enabled(self.advanced.cache_state)
    }

    /// Whether cached state is persisted across restarts.
    #[must_use]
    pub fn persists_state(&self) -> bool {
        self.advanced.cache_state && self.advanced.cache_state_persistent
    }

    /// Interval between state saves.
    #[must_use]
    pub fn state_save_interval(&self) -> Duration {
        Duration::from_secs(self.advanced.state_save_interval_secs.max(1))
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Neither `publish_as_json` nor `publish_as_key_topics` is set
    #[error("no output encoding enabled: set publish_as_json or publish_as_key_topics")]
    NoOutputEncoding,
    /// A device has an unusable friendly name
    #[error("device {device}: {source}")]
    FriendlyName {
        /// Device address
        device: String,
        /// What is wrong with the name
        #[source]
        source: TopicError,
    },
    /// Two devices share a friendly name
    #[error("friendly name '{name}' is used by both {first} and {second}")]
    DuplicateFriendlyName {
        /// The shared name
        name: String,
        /// First device using it
        first: String,
        /// Second device using it
        second: String,
    },
}
