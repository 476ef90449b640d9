//! # meshbridge Core
//!
//! Device state model for the meshbridge state publication engine.
//!
//! This crate provides:
//! - Attribute values and insertion-ordered attribute maps
//! - Device identity and normalized device events
//! - The per-device state cache
//! - Merge policies combining deltas with cached state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod device;
pub mod merge;
pub mod value;

pub use cache::StateCache;
pub use device::{Device, DeviceId, NormalizedEvent, StateDelta};
pub use merge::MergePolicy;
pub use value::{AttrMap, AttrValue, ValueError};
