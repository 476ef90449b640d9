//! # meshbridge Agent
//!
//! State publication runtime for devices bridged from a Zigbee decoder.
//!
//! ## Architecture
//!
//! The agent runs one loop that multiplexes:
//! 1. **Ingress**: decoded messages from stdin or an MQTT topic
//! 2. **Publication**: cache merge, encoding and MQTT publish per event
//! 3. **Reload**: configuration changes (SIGHUP) applied between events
//! 4. **Persistence**: periodic `SQLite` snapshots of cached state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod persistence;
pub mod publisher;
pub mod registry;
pub mod runtime;

pub use config::{BridgeSettings, ConfigError, DecoderSource};
pub use controller::{Controller, ControllerError, EventOutcome};
pub use persistence::{StateStore, StoreError};
pub use publisher::{MemoryPublisher, MqttPublisher, PublishError, Publisher};
pub use registry::{DeviceRegistry, DeviceTable, LookupError};
pub use runtime::Agent;
