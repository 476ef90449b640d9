//! Agent runtime orchestration.

use crate::config::BridgeSettings;
use crate::controller::{Controller, ControllerError};
use crate::persistence::StateStore;
use crate::publisher::{MqttPublisher, Publisher};
use crate::registry::DeviceTable;
use anyhow::{Context, Result};
use meshbridge_adapter_zigbee::{MessageParseError, ZigbeeMessage};
use meshbridge_core::{DeviceId, StateCache};
use rumqttc::{Event, EventLoop, Outgoing, Packet};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Decoded messages (or parse failures) in arrival order.
pub type MessageRx = mpsc::Receiver<Result<ZigbeeMessage, MessageParseError>>;

/// The main agent runtime.
pub struct Agent {
    settings: watch::Receiver<BridgeSettings>,
    store: Option<StateStore>,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// Returns error if the state database cannot be opened.
    pub fn new(settings: watch::Receiver<BridgeSettings>) -> Result<Self> {
        let store = {
            let current = settings.borrow();
            if current.persists_state() {
                Some(
                    StateStore::open(&current.advanced.db_path)
                        .context("Failed to open SQLite database")?,
                )
            } else {
                None
            }
        };

        Ok(Self { settings, store })
    }

    /// Run until the message source closes or Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Returns error if the publisher or state store cannot be set up.
    pub async fn run(self, mut messages: MessageRx) -> Result<()> {
        let Self {
            settings: mut settings_rx,
            mut store,
        } = self;

        let mut settings = settings_rx.borrow_and_update().clone();
        let client_id = settings
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("meshbridge-{}", Uuid::new_v4()));

        tracing::info!(
            client_id,
            server = %settings.mqtt.server,
            base_topic = %settings.mqtt.base_topic,
            "Starting agent runtime"
        );

        let (publisher, mut eventloop) =
            MqttPublisher::new(&settings.mqtt, &client_id).context("Failed to create MQTT publisher")?;

        let mut cache = StateCache::new();
        if let Some(store) = store.as_ref() {
            let restored = store
                .restore_into(&mut cache)
                .context("Failed to restore device state")?;
            tracing::info!(devices = restored, "Restored cached device state");
        }

        let mut controller =
            Controller::with_cache(DeviceTable::from_settings(&settings), publisher, cache);
        let stale = clear_unregistered(&mut controller);
        if !stale.is_empty() {
            tracing::info!(devices = stale.len(), "Cleared stored state of unconfigured devices");
        }

        let mut save_timer = tokio::time::interval(settings.state_save_interval());
        let mut settings_open = true;

        tracing::info!(devices = controller.registry().len(), "Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!("Connected to MQTT broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "MQTT error");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }

                message = messages.recv() => {
                    match message {
                        Some(Ok(message)) => handle_message(&mut controller, &message, &settings),
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "Dropping unparseable decoder message");
                        }
                        None => {
                            tracing::info!("Decoder input closed");
                            break;
                        }
                    }
                }

                changed = settings_rx.changed(), if settings_open => {
                    if changed.is_ok() {
                        let next = settings_rx.borrow_and_update().clone();
                        apply_settings(&mut controller, &settings, &next);
                        settings = next;
                    } else {
                        settings_open = false;
                    }
                }

                _ = save_timer.tick(), if store.is_some() => {
                    if let Some(store) = store.as_mut() {
                        flush_state(store, controller.cache_mut());
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(store) = store.as_mut() {
            flush_state(store, controller.cache_mut());
        }

        if let Err(err) = controller.publisher().disconnect() {
            tracing::warn!(error = %err, "Failed to request MQTT disconnect");
        } else {
            drain_eventloop(&mut eventloop).await;
        }

        tracing::info!("Agent stopped");
        Ok(())
    }
}

/// Run one decoded message through the controller.
///
/// Failures are logged and do not stop the runtime.
pub fn handle_message<P: Publisher>(
    controller: &mut Controller<DeviceTable, P>,
    message: &ZigbeeMessage,
    settings: &BridgeSettings,
) {
    let Some(event) = message.to_event() else {
        return;
    };

    controller
        .registry_mut()
        .note_model(&event.device.id, &event.device.model_id);

    match controller.on_event(&event, settings) {
        Ok(outcome) => {
            tracing::trace!(
                device_id = %event.device.id,
                published = outcome.published,
                skipped = outcome.skipped.len(),
                "Event processed"
            );
        }
        Err(ControllerError::Lookup(err)) => {
            tracing::warn!(error = %err, "Ignoring message from unregistered device");
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                device_id = %event.device.id,
                "Failed to publish device state"
            );
        }
    }
}

/// Apply reloaded settings to a running controller.
///
/// Devices dropped from the configuration have their cached state cleared,
/// so the next save deletes it from the store. Returns the cleared devices.
pub fn apply_settings<P: Publisher>(
    controller: &mut Controller<DeviceTable, P>,
    previous: &BridgeSettings,
    next: &BridgeSettings,
) -> Vec<DeviceId> {
    let needs_restart = restart_only_changes(previous, next);
    if !needs_restart.is_empty() {
        tracing::warn!(
            settings = ?needs_restart,
            "Changed settings take effect only after a restart"
        );
    }

    let removed = controller.registry_mut().reload(next);
    for id in &removed {
        controller.cache_mut().clear(id);
        tracing::info!(device_id = %id, "Device removed from configuration, state cleared");
    }

    tracing::info!(
        devices = controller.registry().len(),
        mode = ?next.encoding_mode(),
        "Configuration reloaded"
    );
    removed
}

/// Clear cached state of every device the registry does not know.
pub fn clear_unregistered<P: Publisher>(controller: &mut Controller<DeviceTable, P>) -> Vec<DeviceId> {
    let mut stale: Vec<DeviceId> = controller
        .cache()
        .iter()
        .map(|(id, _)| id)
        .filter(|id| !controller.registry().contains(id))
        .cloned()
        .collect();
    stale.sort();

    for id in &stale {
        controller.cache_mut().clear(id);
    }
    stale
}

/// Settings read once at startup that differ between `previous` and `next`.
#[must_use]
pub fn restart_only_changes(previous: &BridgeSettings, next: &BridgeSettings) -> Vec<&'static str> {
    let checks = [
        ("mqtt.server", previous.mqtt.server != next.mqtt.server),
        ("mqtt.base_topic", previous.mqtt.base_topic != next.mqtt.base_topic),
        ("mqtt.client_id", previous.mqtt.client_id != next.mqtt.client_id),
        ("mqtt.keepalive_secs", previous.mqtt.keepalive_secs != next.mqtt.keepalive_secs),
        ("decoder", previous.decoder != next.decoder),
        ("advanced.db_path", previous.advanced.db_path != next.advanced.db_path),
        (
            "advanced.cache_state_persistent",
            previous.advanced.cache_state_persistent != next.advanced.cache_state_persistent,
        ),
        (
            "advanced.state_save_interval_secs",
            previous.advanced.state_save_interval_secs != next.advanced.state_save_interval_secs,
        ),
    ];

    checks
        .into_iter()
        .filter_map(|(name, changed)| changed.then_some(name))
        .collect()
}

/// Read decoded messages as JSON lines.
///
/// Blank lines are skipped. The channel closes when the reader reaches EOF.
pub fn spawn_line_reader<R>(reader: R) -> MessageRx
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let message = ZigbeeMessage::parse(line.as_bytes());
                    if let Err(err) = &message {
                        tracing::warn!(error = %err, "Failed to parse decoder line");
                    }

                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to read decoder input");
                    break;
                }
            }
        }
    });

    rx
}

fn flush_state(store: &mut StateStore, cache: &mut StateCache) {
    match store.flush(cache) {
        Ok(0) => {}
        Ok(rows) => tracing::debug!(rows, "Saved device state"),
        Err(err) => tracing::warn!(error = %err, "Failed to save device state"),
    }
}

/// Let queued publishes and the disconnect go out.
async fn drain_eventloop(eventloop: &mut EventLoop) {
    let drain = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    if tokio::time::timeout(Duration::from_secs(2), drain).await.is_err() {
        tracing::debug!("Timed out waiting for MQTT disconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;
    use crate::publisher::MemoryPublisher;
    use crate::registry::DeviceRegistry;

    fn settings() -> BridgeSettings {
        let mut settings = BridgeSettings::default();
        settings.devices.insert(
            "0x12345678".to_string(),
            DeviceSettings {
                friendly_name: "test".to_string(),
                retain: false,
                model_id: None,
            },
        );
        settings
    }

    fn on_off(addr: &str, on: u8) -> ZigbeeMessage {
        let json = format!(
            r#"{{"type":"devChange","cluster":"genOnOff",
                "device":{{"ieeeAddr":"{addr}","modelId":"TRADFRI bulb E27 CWS opal 600lm"}},
                "data":{{"onOff":{on}}}}}"#
        );
        ZigbeeMessage::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn handle_message_publishes_and_learns_model() {
        let settings = settings();
        let mut controller =
            Controller::new(DeviceTable::from_settings(&settings), MemoryPublisher::new());

        handle_message(&mut controller, &on_off("0x12345678", 1), &settings);
        handle_message(&mut controller, &on_off("0xdeadbeef", 1), &settings);

        let published = controller.publisher_mut().drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "test");
        assert_eq!(published[0].payload, r#"{"state":"ON"}"#);

        let device = controller
            .registry()
            .lookup_device(&"0x12345678".into())
            .unwrap();
        assert_eq!(device.model_id, "TRADFRI bulb E27 CWS opal 600lm");
    }

    #[test]
    fn removed_device_state_is_cleared_and_deleted() {
        let before = settings();
        let mut after = before.clone();
        after.devices.remove("0x12345678");

        let mut controller =
            Controller::new(DeviceTable::from_settings(&before), MemoryPublisher::new());
        let mut store = StateStore::in_memory().unwrap();

        handle_message(&mut controller, &on_off("0x12345678", 1), &before);
        assert_eq!(store.flush(controller.cache_mut()).unwrap(), 1);
        assert_eq!(store.load_all().unwrap().len(), 1);

        let removed = apply_settings(&mut controller, &before, &after);
        assert_eq!(removed, vec![DeviceId::new("0x12345678")]);
        assert!(controller.cache().is_empty());

        assert_eq!(store.flush(controller.cache_mut()).unwrap(), 1);
        assert!(store.load_all().unwrap().is_empty());

        let mut restored = StateCache::new();
        assert_eq!(store.restore_into(&mut restored).unwrap(), 0);
    }

    #[test]
    fn restored_state_of_unconfigured_device_is_cleared() {
        let mut cache = StateCache::new();
        let state: meshbridge_core::AttrMap = [("state", "ON")].into_iter().collect();
        cache.restore(DeviceId::new("0x12345678"), state.clone());
        cache.restore(DeviceId::new("0xdeadbeef"), state);

        let mut controller = Controller::with_cache(
            DeviceTable::from_settings(&settings()),
            MemoryPublisher::new(),
            cache,
        );

        assert_eq!(
            clear_unregistered(&mut controller),
            vec![DeviceId::new("0xdeadbeef")]
        );
        assert_eq!(controller.cache().len(), 1);
        assert_eq!(controller.cache_mut().take_cleared(), vec![DeviceId::new("0xdeadbeef")]);
    }

    #[test]
    fn kept_devices_survive_reload() {
        let before = settings();
        let mut after = before.clone();
        after.publish_as_key_topics = true;

        let mut controller =
            Controller::new(DeviceTable::from_settings(&before), MemoryPublisher::new());
        handle_message(&mut controller, &on_off("0x12345678", 1), &before);

        assert!(apply_settings(&mut controller, &before, &after).is_empty());
        assert_eq!(controller.cache().len(), 1);
    }

    #[test]
    fn startup_only_settings_are_reported() {
        let before = settings();
        let mut after = before.clone();
        assert!(restart_only_changes(&before, &after).is_empty());

        after.mqtt.base_topic = "home".to_string();
        after.mqtt.server = "tcp://broker:1883".to_string();
        after.publish_as_key_topics = true;
        assert_eq!(
            restart_only_changes(&before, &after),
            vec!["mqtt.server", "mqtt.base_topic"]
        );
    }

    #[test]
    fn line_reader_skips_blank_lines() {
        tokio_test::block_on(async {
            let input: &'static [u8] = b"{\"type\":\"devChange\",\"cluster\":\"genOnOff\",\"device\":{\"ieeeAddr\":\"0x1\"},\"data\":{\"onOff\":0}}\n\n   \nnot json\n";
            let mut rx = spawn_line_reader(tokio::io::BufReader::new(input));

            let first = rx.recv().await.unwrap().unwrap();
            assert_eq!(first.device.ieee_addr, "0x1");
            assert!(rx.recv().await.unwrap().is_err());
            assert!(rx.recv().await.is_none());
        });
    }
}
