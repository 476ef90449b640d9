//! Merging incoming deltas with cached device state.
//!
//! | Policy | Merged state | Cache |
//! |--------|--------------|-------|
//! | `Cached` | cached state with the delta applied key by key | read and written |
//! | `Bypass` | the delta, verbatim | untouched |

use crate::cache::StateCache;
use crate::device::{DeviceId, StateDelta};
use crate::value::AttrMap;

/// How a delta is combined with previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Merge into the state cache
    Cached,
    /// Use the delta alone
    Bypass,
}

impl MergePolicy {
    /// Policy for the `cache_state` setting.
    #[must_use]
    pub fn from_cache_enabled(cache_enabled: bool) -> Self {
        if cache_enabled {
            MergePolicy::Cached
        } else {
            MergePolicy::Bypass
        }
    }

    /// Produce the merged state for `id`.
    pub fn apply(self, cache: &mut StateCache, id: &DeviceId, delta: &StateDelta) -> AttrMap {
        match self {
            MergePolicy::Cached => cache.merge(id, delta),
            MergePolicy::Bypass => delta.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttrValue;

    #[test]
    fn cached_policy_merges() {
        let mut cache = StateCache::new();
        let id = DeviceId::new("0x1");

        MergePolicy::Cached.apply(&mut cache, &id, &[("state", "ON")].into_iter().collect());
        let merged = MergePolicy::Cached.apply(
            &mut cache,
            &id,
            &[("brightness", AttrValue::Int(3))].into_iter().collect(),
        );

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["state", "brightness"]);
    }

    #[test]
    fn bypass_ignores_and_preserves_cache() {
        let mut cache = StateCache::new();
        let id = DeviceId::new("0x1");
        cache.merge(&id, &[("state", "ON"), ("mode", "auto")].into_iter().collect());

        let delta: StateDelta = [("state", "OFF")].into_iter().collect();
        let merged = MergePolicy::Bypass.apply(&mut cache, &id, &delta);

        assert_eq!(merged, delta);
        assert_eq!(cache.get(&id).get("state"), Some(&AttrValue::from("ON")));
        assert_eq!(cache.get(&id).len(), 2);
    }

    #[test]
    fn bypass_on_unseen_device_creates_no_entry() {
        let mut cache = StateCache::new();
        MergePolicy::Bypass.apply(
            &mut cache,
            &DeviceId::new("0x2"),
            &[("state", "ON")].into_iter().collect(),
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn policy_from_flag() {
        assert_eq!(MergePolicy::from_cache_enabled(true), MergePolicy::Cached);
        assert_eq!(MergePolicy::from_cache_enabled(false), MergePolicy::Bypass);
    }
}
