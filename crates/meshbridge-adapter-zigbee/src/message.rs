//! Decoded Zigbee messages.

use crate::converters;
use meshbridge_core::{Device, NormalizedEvent};
use serde::{Deserialize, Serialize};

/// Kind of Zigbee message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Attribute changed (reported by the stack's device tracking)
    DevChange,
    /// Attribute report
    AttReport,
    /// Read attributes response
    ReadRsp,
    /// Anything else (commands, announcements, ...)
    #[serde(other)]
    Other,
}

impl MessageType {
    /// Whether the message carries attribute values.
    #[must_use]
    pub fn is_attribute_update(self) -> bool {
        matches!(
            self,
            MessageType::DevChange | MessageType::AttReport | MessageType::ReadRsp
        )
    }
}

/// Device identity as seen by the Zigbee stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZigbeeDevice {
    /// IEEE address
    pub ieee_addr: String,
    /// Model identifier from the basic cluster
    #[serde(default)]
    pub model_id: String,
}

/// A message decoded by the Zigbee stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZigbeeMessage {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Cluster name (e.g. `genOnOff`)
    pub cluster: String,
    /// Source device
    pub device: ZigbeeDevice,
    /// Source endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    /// Attribute values keyed by attribute name
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

fn default_endpoint() -> u8 {
    1
}

impl ZigbeeMessage {
    /// Parse a message from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a valid message.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageParseError> {
        if payload.is_empty() {
            return Err(MessageParseError::Empty);
        }
        serde_json::from_slice(payload).map_err(|e| MessageParseError::Payload(e.to_string()))
    }

    /// Convert to a normalized event.
    ///
    /// The friendly name is left as the IEEE address; the device registry
    /// supplies the real one. Returns `None` if no converter produced any
    /// attribute.
    #[must_use]
    pub fn to_event(&self) -> Option<NormalizedEvent> {
        let delta = converters::convert(self);
        if delta.is_empty() {
            tracing::debug!(
                ieee_addr = %self.device.ieee_addr,
                cluster = %self.cluster,
                msg_type = ?self.msg_type,
                supported = converters::supports(&self.cluster),
                "No converter output for message"
            );
            return None;
        }

        let device = Device::new(
            self.device.ieee_addr.as_str(),
            self.device.ieee_addr.clone(),
            self.device.model_id.clone(),
        );
        Some(NormalizedEvent::new(device, delta))
    }
}

/// Errors that can occur parsing decoded messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageParseError {
    /// Empty payload
    #[error("empty message payload")]
    Empty,
    /// Failed to parse payload JSON
    #[error("payload parse error: {0}")]
    Payload(String),
}
