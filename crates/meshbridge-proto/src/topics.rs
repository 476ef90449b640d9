//! Bus topic construction.
//!
//! Topic structure: `{friendly_name}` for whole-device payloads and
//! `{friendly_name}/{attribute}` for per-attribute payloads.
//!
//! No prefix is applied here. A transport-level base topic (e.g.
//! `zigbee2mqtt`) is added by the publisher through [`TopicPrefix`].

use meshbridge_core::Device;
use serde::{Deserialize, Serialize};

/// Base topic of a device: its friendly name, unchanged.
#[must_use]
pub fn base_topic(device: &Device) -> &str {
    &device.friendly_name
}

/// Topic for a single attribute of a device.
#[must_use]
pub fn key_topic(base: &str, key: &str) -> String {
    format!("{base}/{key}")
}

/// Check that a friendly name can be used as a topic.
///
/// # Errors
///
/// Returns an error if the name is empty, contains MQTT wildcards, or
/// starts or ends with a `/`.
pub fn validate_friendly_name(name: &str) -> Result<(), TopicError> {
    if name.is_empty() {
        return Err(TopicError::Empty);
    }
    if name.contains(['+', '#']) {
        return Err(TopicError::Wildcard(name.to_string()));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(TopicError::Separator(name.to_string()));
    }
    Ok(())
}

/// Transport-level topic prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPrefix {
    /// Prefix (default: "zigbee2mqtt"); empty means no prefix
    pub base_topic: String,
}

impl Default for TopicPrefix {
    fn default() -> Self {
        Self::new("zigbee2mqtt")
    }
}

impl TopicPrefix {
    /// Create a prefix.
    #[must_use]
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
        }
    }

    /// Full transport topic for an envelope topic.
    #[must_use]
    pub fn apply(&self, topic: &str) -> String {
        if self.base_topic.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{}", self.base_topic, topic)
        }
    }

    /// Strip the prefix from a transport topic.
    ///
    /// Returns `(friendly_name, attribute)` if the topic belongs to this prefix.
    /// The split happens at the last `/`, so a nested friendly name such as
    /// `room/lamp` parses as `("room", Some("lamp"))`.
    #[must_use]
    pub fn parse<'a>(&self, topic: &'a str) -> Option<(&'a str, Option<&'a str>)> {
        let remainder = if self.base_topic.is_empty() {
            topic
        } else {
            topic
                .strip_prefix(self.base_topic.as_str())?
                .strip_prefix('/')?
        };

        if remainder.is_empty() {
            return None;
        }

        Some(match remainder.rsplit_once('/') {
            Some((name, key)) if !name.is_empty() && !key.is_empty() => (name, Some(key)),
            _ => (remainder, None),
        })
    }

    /// Wildcard subscription for everything under the prefix.
    #[must_use]
    pub fn wildcard(&self) -> String {
        self.apply("#")
    }
}

/// Errors for invalid topic names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Empty friendly name
    #[error("friendly name is empty")]
    Empty,
    /// Friendly name contains `+` or `#`
    #[error("friendly name '{0}' contains an MQTT wildcard")]
    Wildcard(String),
    /// Friendly name starts or ends with `/`
    #[error("friendly name '{0}' starts or ends with '/'")]
    Separator(String),
}
