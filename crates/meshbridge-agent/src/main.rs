//! meshbridge agent binary.
//!
//! Reads decoded Zigbee messages and publishes device state to MQTT.
//! Send SIGHUP to reload the configuration file without restarting.

use anyhow::{Context, Result};
use meshbridge_adapter_zigbee::{DecoderSubscriber, DecoderSubscriberConfig};
use meshbridge_agent::runtime::{spawn_line_reader, MessageRx};
use meshbridge_agent::{Agent, BridgeSettings, DecoderSource};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting meshbridge agent");

    let settings = load_settings()?;
    let (settings_tx, settings_rx) = watch::channel(settings.clone());

    #[cfg(unix)]
    spawn_reload_handler(settings_tx)?;
    #[cfg(not(unix))]
    drop(settings_tx);

    let messages = open_decoder(&settings).await?;

    let agent = Agent::new(settings_rx)?;
    agent.run(messages).await?;

    Ok(())
}

fn load_settings() -> Result<BridgeSettings> {
    let settings = BridgeSettings::load()?;
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

async fn open_decoder(settings: &BridgeSettings) -> Result<MessageRx> {
    match settings.decoder.source {
        DecoderSource::Stdin => {
            tracing::info!("Reading decoded messages from stdin");
            Ok(spawn_line_reader(tokio::io::BufReader::new(tokio::io::stdin())))
        }
        DecoderSource::Mqtt => {
            let client_id = settings.mqtt.client_id.as_ref().map_or_else(
                || format!("meshbridge-decoder-{}", Uuid::new_v4()),
                |id| format!("{id}-decoder"),
            );
            let config = DecoderSubscriberConfig {
                mqtt_broker: settings.mqtt.server.clone(),
                client_id,
                topic: settings.decoder.topic.clone(),
                keep_alive: Duration::from_secs(settings.mqtt.keepalive_secs.max(5)),
            };

            let subscriber =
                DecoderSubscriber::new(config).context("Failed to create decoder subscriber")?;
            subscriber
                .subscribe()
                .await
                .context("Failed to subscribe to decoder topic")?;
            Ok(subscriber.start())
        }
    }
}

#[cfg(unix)]
fn spawn_reload_handler(settings_tx: watch::Sender<BridgeSettings>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match load_settings() {
                Ok(settings) => {
                    tracing::info!("Reloading configuration");
                    if settings_tx.send(settings).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "Keeping previous configuration");
                }
            }
        }
    });

    Ok(())
}
