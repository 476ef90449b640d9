//! # Zigbee Adapter
//!
//! Ingestion of messages decoded by an external Zigbee stack.
//!
//! ## Message Format
//!
//! The decoder publishes one JSON object per attribute event:
//!
//! ```json
//! {"type": "devChange", "cluster": "genOnOff",
//!  "device": {"ieeeAddr": "0x12345678", "modelId": "TRADFRI bulb E27 CWS opal 600lm"},
//!  "endpoint": 1, "data": {"onOff": 1}}
//! ```
//!
//! Cluster converters turn `data` into a state delta such as `{"state": "ON"}`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod converters;
pub mod message;
pub mod subscriber;

pub use message::{MessageParseError, MessageType, ZigbeeDevice, ZigbeeMessage};
pub use subscriber::{parse_mqtt_url, DecoderSubscriber, DecoderSubscriberConfig, SubscriberError};
