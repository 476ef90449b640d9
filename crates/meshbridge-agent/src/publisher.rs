//! Bus publishers.

use crate::config::MqttSettings;
use meshbridge_adapter_zigbee::parse_mqtt_url;
use meshbridge_proto::{PublishEnvelope, PublishOptions, TopicPrefix};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;

/// Outbound side of the bus transport.
pub trait Publisher {
    /// Publish one message.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    fn publish(&mut self, topic: &str, payload: &str, options: PublishOptions) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for &mut P {
    fn publish(&mut self, topic: &str, payload: &str, options: PublishOptions) -> Result<(), PublishError> {
        (**self).publish(topic, payload, options)
    }
}

/// MQTT publisher that prefixes every topic with the configured base topic.
pub struct MqttPublisher {
    client: AsyncClient,
    prefix: TopicPrefix,
}

impl MqttPublisher {
    /// Create a publisher and the event loop that must be polled to drive it.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(settings: &MqttSettings, client_id: &str) -> Result<(Self, EventLoop), PublishError> {
        let (host, port) =
            parse_mqtt_url(&settings.server).map_err(|e| PublishError::InvalidBrokerUrl(e.to_string()))?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(settings.keepalive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 1000);

        Ok((
            Self {
                client,
                prefix: TopicPrefix::new(settings.base_topic.clone()),
            },
            eventloop,
        ))
    }

    /// Topic prefix applied to publications.
    #[must_use]
    pub fn prefix(&self) -> &TopicPrefix {
        &self.prefix
    }

    /// Request a clean disconnect from the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    pub fn disconnect(&self) -> Result<(), PublishError> {
        self.client
            .try_disconnect()
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: &str, options: PublishOptions) -> Result<(), PublishError> {
        let topic = self.prefix.apply(topic);

        tracing::debug!(topic, payload_len = payload.len(), retain = options.retain, "Publishing");

        self.client
            .try_publish(topic, QoS::AtMostOnce, options.retain, payload)
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

/// Publisher that keeps every message in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    /// Messages published so far
    pub published: Vec<PublishEnvelope>,
}

impl MemoryPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything published so far.
    pub fn drain(&mut self) -> Vec<PublishEnvelope> {
        std::mem::take(&mut self.published)
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&mut self, topic: &str, payload: &str, options: PublishOptions) -> Result<(), PublishError> {
        self.published
            .push(PublishEnvelope::new(topic, payload, options.retain));
        Ok(())
    }
}

/// Errors for publish operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Transport refused the message
    #[error("publish error: {0}")]
    Transport(String),
}
