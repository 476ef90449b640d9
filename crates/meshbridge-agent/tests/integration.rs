use meshbridge_adapter_zigbee::{parse_mqtt_url, ZigbeeMessage};
use meshbridge_agent::config::{DeviceSettings, MqttSettings};
use meshbridge_agent::runtime::handle_message;
use meshbridge_agent::{BridgeSettings, Controller, DeviceTable, MqttPublisher};
use meshbridge_proto::TopicPrefix;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

async fn spawn_eventloop(mut eventloop: EventLoop) {
    loop {
        if eventloop.poll().await.is_err() {
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mqtt_state_roundtrip() {
    if std::env::var("MESHBRIDGE_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set MESHBRIDGE_INTEGRATION=1 to run");
        return;
    }

    let broker = std::env::var("MESHBRIDGE_MQTT_SERVER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    let (host, port) = parse_mqtt_url(&broker).unwrap();

    let base_topic = format!("meshbridge-it-{}", Uuid::new_v4().simple());
    let prefix = TopicPrefix::new(base_topic.clone());
    let mut settings = BridgeSettings {
        mqtt: MqttSettings {
            base_topic,
            server: broker,
            include_device_information: true,
            ..MqttSettings::default()
        },
        ..BridgeSettings::default()
    };
    settings.devices.insert(
        "0x12345678".to_string(),
        DeviceSettings {
            friendly_name: "test".to_string(),
            retain: false,
            model_id: None,
        },
    );

    let mut sub_opts = MqttOptions::new(format!("sub-{}", Uuid::new_v4()), host, port);
    sub_opts.set_keep_alive(Duration::from_secs(5));
    let (sub_client, mut sub_eventloop) = AsyncClient::new(sub_opts, 10);
    sub_client
        .subscribe(prefix.wildcard(), QoS::AtLeastOnce)
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        loop {
            match sub_eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let _ = tx.send((publish.topic, publish.payload.to_vec()));
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    let (publisher, pub_eventloop) =
        MqttPublisher::new(&settings.mqtt, &format!("pub-{}", Uuid::new_v4())).unwrap();
    tokio::spawn(spawn_eventloop(pub_eventloop));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut controller = Controller::new(DeviceTable::from_settings(&settings), publisher);
    let message = ZigbeeMessage::parse(
        br#"{"type":"attReport","cluster":"genOnOff",
             "device":{"ieeeAddr":"0x12345678","modelId":"TRADFRI bulb E27 CWS opal 600lm"},
             "data":{"onOff":1}}"#,
    )
    .unwrap();
    handle_message(&mut controller, &message, &settings);

    let (topic, payload) = timeout(Duration::from_secs(5), rx)
        .await
        .expect("timeout waiting for MQTT message")
        .expect("subscriber dropped");

    assert_eq!(prefix.parse(&topic), Some(("test", None)));
    let payload: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(payload["state"], "ON");
    assert_eq!(payload["device"]["modelId"], "TRADFRI bulb E27 CWS opal 600lm");
}
