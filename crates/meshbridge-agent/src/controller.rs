//! Per-event state publication.
//!
//! For each normalized event the controller:
//! 1. resolves the device through the registry,
//! 2. merges the delta with cached state (unless caching is disabled),
//! 3. attaches device metadata (aggregate encoding only),
//! 4. encodes the result into envelopes,
//! 5. hands every envelope to the publisher, in order.
//!
//! Settings are passed in with every event and never stored, so a change
//! between two events applies to the second one.

use crate::config::BridgeSettings;
use crate::publisher::{PublishError, Publisher};
use crate::registry::{DeviceRegistry, LookupError};
use meshbridge_core::{NormalizedEvent, StateCache};
use meshbridge_proto::{base_topic, EncodingError, EncodingMode, SkippedKey};

/// What happened to one event.
#[derive(Debug, Default, PartialEq)]
pub struct EventOutcome {
    /// Number of publisher calls made
    pub published: usize,
    /// Key-topic envelopes left out because their value could not be encoded
    pub skipped: Vec<SkippedKey>,
}

/// Drives state publication for device events.
///
/// One event is processed at a time; `on_event` takes `&mut self` and
/// returns only after every envelope has been handed to the publisher.
pub struct Controller<R, P> {
    registry: R,
    publisher: P,
    cache: StateCache,
}

impl<R: DeviceRegistry, P: Publisher> Controller<R, P> {
    /// Create a controller with an empty state cache.
    #[must_use]
    pub fn new(registry: R, publisher: P) -> Self {
        Self::with_cache(registry, publisher, StateCache::new())
    }

    /// Create a controller around an existing (e.g. restored) state cache.
    #[must_use]
    pub fn with_cache(registry: R, publisher: P, cache: StateCache) -> Self {
        Self {
            registry,
            publisher,
            cache,
        }
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::Lookup`]: unknown device, nothing published, cache untouched
    /// - [`ControllerError::Encoding`]: aggregate payload could not be encoded,
    ///   nothing published
    /// - [`ControllerError::Publish`]: the publisher failed; envelopes after the
    ///   failing one are not attempted
    ///
    /// A cache merge that happened before an encoding or publish failure is kept.
    pub fn on_event(
        &mut self,
        event: &NormalizedEvent,
        settings: &BridgeSettings,
    ) -> Result<EventOutcome, ControllerError> {
        let device = self.registry.lookup_device(&event.device.id)?;

        if event.delta.is_empty() {
            tracing::debug!(device_id = %device.id, "Empty delta, nothing to publish");
            return Ok(EventOutcome::default());
        }

        let merged = settings
            .merge_policy()
            .apply(&mut self.cache, &device.id, &event.delta);

        let Some(mode) = settings.encoding_mode() else {
            tracing::warn!(
                device_id = %device.id,
                "No output encoding enabled, dropping event"
            );
            return Ok(EventOutcome::default());
        };

        let payload_state = match mode {
            EncodingMode::AggregateJson => settings.device_info().attach(merged, &device),
            EncodingMode::KeyTopics => merged,
        };

        let encoded = mode.encode(
            base_topic(&device),
            &payload_state,
            event.delta.keys(),
            device.retain,
        )?;

        for skipped in &encoded.skipped {
            tracing::warn!(
                device_id = %device.id,
                key = %skipped.key,
                error = %skipped.error,
                "Skipping attribute that cannot be encoded"
            );
        }

        for envelope in &encoded.envelopes {
            self.publisher
                .publish(&envelope.topic, &envelope.payload, envelope.options())?;
        }

        tracing::debug!(
            device_id = %device.id,
            friendly_name = %device.friendly_name,
            mode = ?mode,
            published = encoded.envelopes.len(),
            "Published device state"
        );

        Ok(EventOutcome {
            published: encoded.envelopes.len(),
            skipped: encoded.skipped,
        })
    }

    /// The state cache.
    #[must_use]
    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Mutable access to the state cache (clearing devices, persistence).
    pub fn cache_mut(&mut self) -> &mut StateCache {
        &mut self.cache
    }

    /// The device registry.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Mutable access to the device registry.
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// The publisher.
    #[must_use]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Mutable access to the publisher.
    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }
}

/// Errors for a single event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    /// The device is not registered
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// The payload could not be encoded
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The publisher failed
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MemoryPublisher;
    use crate::registry::DeviceTable;
    use meshbridge_core::{AttrValue, Device, DeviceId};

    fn controller() -> Controller<DeviceTable, MemoryPublisher> {
        let mut table = DeviceTable::new();
        table.insert(Device::new("0x1", "lamp", "LED1545G12"));
        Controller::new(table, MemoryPublisher::new())
    }

    fn event(pairs: &[(&str, AttrValue)]) -> NormalizedEvent {
        NormalizedEvent::new(
            Device::new("0x1", "0x1", "LED1545G12"),
            pairs.iter().cloned().collect(),
        )
    }

    #[test]
    fn aggregate_payload_accumulates_state() {
        let mut controller = controller();
        let settings = BridgeSettings::default();

        controller
            .on_event(&event(&[("state", "ON".into())]), &settings)
            .unwrap();
        controller
            .on_event(&event(&[("brightness", 100.into())]), &settings)
            .unwrap();

        let payloads: Vec<_> = controller
            .publisher_mut()
            .drain()
            .into_iter()
            .map(|e| e.payload)
            .collect();
        assert_eq!(
            payloads,
            vec![
                r#"{"state":"ON"}"#.to_string(),
                r#"{"state":"ON","brightness":100}"#.to_string(),
            ]
        );
    }

    #[test]
    fn key_topics_publish_only_delta_keys() {
        let mut controller = controller();
        let mut settings = BridgeSettings::default();

        controller
            .on_event(&event(&[("state", "ON".into())]), &settings)
            .unwrap();
        controller.publisher_mut().drain();

        settings.publish_as_json = false;
        settings.publish_as_key_topics = true;
        let outcome = controller
            .on_event(&event(&[("brightness", 100.into())]), &settings)
            .unwrap();

        assert_eq!(outcome.published, 1);
        let published = controller.publisher_mut().drain();
        assert_eq!(published[0].topic, "lamp/brightness");
        assert_eq!(published[0].payload, "100");
    }

    #[test]
    fn empty_delta_publishes_nothing() {
        let mut controller = controller();
        let outcome = controller
            .on_event(&event(&[]), &BridgeSettings::default())
            .unwrap();

        assert_eq!(outcome, EventOutcome::default());
        assert!(controller.publisher().published.is_empty());
        assert!(controller.cache().is_empty());
    }

    #[test]
    fn no_encoding_merges_but_publishes_nothing() {
        let mut controller = controller();
        let settings = BridgeSettings {
            publish_as_json: false,
            publish_as_key_topics: false,
            ..BridgeSettings::default()
        };

        let outcome = controller
            .on_event(&event(&[("state", "ON".into())]), &settings)
            .unwrap();

        assert_eq!(outcome.published, 0);
        assert!(controller.publisher().published.is_empty());
        assert_eq!(controller.cache().get(&DeviceId::new("0x1")).len(), 1);
    }
}
