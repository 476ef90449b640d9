//! # meshbridge CLI
//!
//! Command-line utilities for previewing publications and inspecting topics.

use anyhow::{bail, Context, Result};
use meshbridge_adapter_zigbee::ZigbeeMessage;
use meshbridge_agent::{BridgeSettings, Controller, DeviceRegistry, DeviceTable, MemoryPublisher};
use meshbridge_proto::TopicPrefix;
use std::env;
use std::io::{BufRead, BufReader, Read};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => encode(&args[2..])?,
        "topic" => {
            if args.len() < 4 {
                eprintln!("Usage: meshbridge topic <base_topic> <topic>");
                std::process::exit(1);
            }
            let prefix = TopicPrefix::new(args[2].as_str());
            match prefix.parse(&args[3]) {
                Some((name, Some(key))) => println!("device={name} attribute={key}"),
                Some((name, None)) => println!("device={name}"),
                None => bail!("'{}' is not under '{}'", args[3], args[2]),
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Run decoded messages through the publication pipeline and print what
/// would be published.
fn encode(args: &[String]) -> Result<()> {
    let mut settings = BridgeSettings::default();
    let mut input = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--key-topics" => {
                settings.publish_as_json = false;
                settings.publish_as_key_topics = true;
            }
            "--device-info" => settings.mqtt.include_device_information = true,
            "--no-cache" => settings.advanced.cache_state = false,
            "--base-topic" => {
                settings.mqtt.base_topic = iter
                    .next()
                    .context("--base-topic needs a value")?
                    .clone();
            }
            other if input.is_none() => input = Some(other.to_string()),
            other => bail!("Unexpected argument: {other}"),
        }
    }

    let reader: Box<dyn Read> = match input.as_deref() {
        None | Some("-") => Box::new(std::io::stdin()),
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("Failed to open {path}"))?,
        ),
    };

    let prefix = TopicPrefix::new(settings.mqtt.base_topic.as_str());
    let mut controller = Controller::new(DeviceTable::new(), MemoryPublisher::new());

    for (line_no, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let message = ZigbeeMessage::parse(line.as_bytes())
            .with_context(|| format!("line {}", line_no + 1))?;
        let Some(event) = message.to_event() else {
            eprintln!("line {}: no state change", line_no + 1);
            continue;
        };

        if controller.registry().lookup_device(&event.device.id).is_err() {
            controller.registry_mut().insert(event.device.clone());
        }

        controller
            .on_event(&event, &settings)
            .with_context(|| format!("line {}", line_no + 1))?;

        for envelope in controller.publisher_mut().drain() {
            let retain = if envelope.retained { " (retained)" } else { "" };
            println!("{}{retain} {}", prefix.apply(&envelope.topic), envelope.payload);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"meshbridge CLI

USAGE:
    meshbridge <COMMAND> [OPTIONS]

COMMANDS:
    encode [OPTIONS] [FILE]      Print the publications for decoded messages
                                 (JSON lines from FILE, or stdin when FILE is - or absent)
        --key-topics             Publish one topic per attribute
        --device-info            Attach device metadata to JSON payloads
        --no-cache               Publish deltas without merging cached state
        --base-topic <TOPIC>     Topic prefix (default: zigbee2mqtt)
    topic <base_topic> <topic>   Split a topic into device and attribute
    help                         Show this help message

EXAMPLES:
    echo '{{"type":"devChange","cluster":"genOnOff","device":{{"ieeeAddr":"0x1"}},"data":{{"onOff":1}}}}' | meshbridge encode
    meshbridge topic zigbee2mqtt zigbee2mqtt/lamp/brightness
"#
    );
}
