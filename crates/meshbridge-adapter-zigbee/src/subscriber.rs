//! MQTT subscriber receiving messages from an external Zigbee decoder.

use crate::message::{MessageParseError, ZigbeeMessage};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Configuration for the decoder subscriber.
#[derive(Debug, Clone)]
pub struct DecoderSubscriberConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub mqtt_broker: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Topic filter the decoder publishes on
    pub topic: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

impl Default for DecoderSubscriberConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: "tcp://localhost:1883".to_string(),
            client_id: "meshbridge-decoder".to_string(),
            topic: "meshbridge/decoded/#".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// MQTT subscriber for decoded Zigbee messages.
pub struct DecoderSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    config: DecoderSubscriberConfig,
}

impl DecoderSubscriber {
    /// Create a new decoder subscriber.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(config: DecoderSubscriberConfig) -> Result<Self, SubscriberError> {
        let (host, port) = parse_mqtt_url(&config.mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok(Self {
            client,
            eventloop,
            config,
        })
    }

    /// Subscribe to the decoder topic.
    ///
    /// # Errors
    ///
    /// Returns error if subscription fails.
    pub async fn subscribe(&self) -> Result<(), SubscriberError> {
        let topic = &self.config.topic;

        tracing::info!(topic, "Subscribing to decoder messages");

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| SubscriberError::Subscribe(e.to_string()))?;

        Ok(())
    }

    /// Start receiving messages.
    ///
    /// Returns a channel receiver for parsed messages, in arrival order.
    pub fn start(mut self) -> mpsc::Receiver<Result<ZigbeeMessage, MessageParseError>> {
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload_len = publish.payload.len();
                        tracing::debug!(topic = %publish.topic, payload_len, "Received decoder message");

                        let message = ZigbeeMessage::parse(&publish.payload);
                        if let Err(err) = &message {
                            tracing::warn!(
                                error = %err,
                                topic = %publish.topic,
                                payload_len,
                                "Failed to parse decoder message"
                            );
                        }

                        if tx.send(message).await.is_err() {
                            tracing::warn!("Message receiver dropped, stopping subscriber");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        tracing::info!("Subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        rx
    }
}

/// Parse MQTT URL into host and port.
///
/// Accepts `tcp://host[:port]`, `mqtt://host[:port]` and bare `host[:port]`;
/// the port defaults to 1883.
///
/// # Errors
///
/// Returns error for other schemes, a missing host, or an invalid port.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), SubscriberError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| SubscriberError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(SubscriberError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| SubscriberError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SubscriberError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| SubscriberError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(SubscriberError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors that can occur with the subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscriberError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
}
