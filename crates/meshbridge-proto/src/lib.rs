//! # meshbridge Protocol
//!
//! Everything between merged device state and the bus transport.
//!
//! ## Components
//!
//! - `DeviceInfo`: optional device metadata on aggregate payloads
//! - `EncodingMode`: aggregate JSON or per-attribute key topics
//! - `PublishEnvelope`: topic/payload pairs handed to the publisher
//!
//! ## Topics
//!
//! Topic scheme: `{friendly_name}` or `{friendly_name}/{attribute}`, with the
//! transport prefix added at the publisher.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod enrich;
pub mod envelope;
pub mod topics;

pub use encoding::{Encoded, EncodingError, EncodingMode, SkippedKey};
pub use enrich::{DeviceInfo, DEVICE_INFO_KEY};
pub use envelope::{PublishEnvelope, PublishOptions};
pub use topics::{base_topic, key_topic, TopicPrefix};
