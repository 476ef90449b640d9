//! Per-device last-known-state cache.
//!
//! # Concurrency
//!
//! `StateCache` has no internal locking. Every mutating method takes
//! `&mut self`, so within safe Rust the borrow checker already serializes
//! access; wrapping it in a shared lock and calling it from several tasks
//! for the same device gives no ordering guarantee between their merges.
//! The controller owns the cache and processes one event at a time.

use crate::device::{DeviceId, StateDelta};
use crate::value::AttrMap;
use std::collections::{HashMap, HashSet};

/// Last published state for every device seen so far.
#[derive(Debug, Default)]
pub struct StateCache {
    states: HashMap<DeviceId, AttrMap>,
    /// Devices merged since the last `take_dirty`
    dirty: HashSet<DeviceId>,
    /// Devices cleared since the last `take_cleared`
    cleared: HashSet<DeviceId>,
}

impl StateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a device; empty if the device was never merged.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> AttrMap {
        self.states.get(id).cloned().unwrap_or_default()
    }

    /// Apply `delta` key by key to the device's entry and return the new full state.
    pub fn merge(&mut self, id: &DeviceId, delta: &StateDelta) -> AttrMap {
        let state = self.states.entry(id.clone()).or_default();
        state.merge_from(delta);
        self.dirty.insert(id.clone());
        self.cleared.remove(id);

        tracing::trace!(
            device_id = %id,
            delta_keys = delta.len(),
            state_keys = state.len(),
            "Merged delta into cached state"
        );
        state.clone()
    }

    /// Drop the cached state of a device.
    pub fn clear(&mut self, id: &DeviceId) {
        if self.states.remove(id).is_some() {
            self.dirty.remove(id);
            self.cleared.insert(id.clone());
            tracing::debug!(device_id = %id, "Cleared cached state");
        }
    }

    /// Seed a device entry from persisted state.
    ///
    /// Unlike `merge`, this does not mark the device as dirty.
    pub fn restore(&mut self, id: DeviceId, state: AttrMap) {
        self.states.insert(id, state);
    }

    /// Devices whose state changed since the previous call.
    pub fn take_dirty(&mut self) -> Vec<(DeviceId, AttrMap)> {
        let mut ids: Vec<_> = self.dirty.drain().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.states.get(&id).cloned().map(|state| (id, state)))
            .collect()
    }

    /// Devices cleared since the previous call.
    pub fn take_cleared(&mut self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.cleared.drain().collect();
        ids.sort();
        ids
    }

    /// Iterate over all cached entries.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &AttrMap)> {
        self.states.iter()
    }

    /// Number of devices with cached state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
