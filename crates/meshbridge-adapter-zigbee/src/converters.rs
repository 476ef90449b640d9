//! Cluster attribute converters.
//!
//! Each converter handles one cluster and turns raw attribute values into
//! bridge state keys.
//!
//! | Cluster | Attribute | State key |
//! |---------|-----------|-----------|
//! | `genOnOff` | `onOff` | `state` (`ON`/`OFF`) |
//! | `genLevelCtrl` | `currentLevel` | `brightness` |
//! | `lightingColorCtrl` | `colorTemperature` | `color_temp` |
//! | `lightingColorCtrl` | `currentX`, `currentY` | `color.x`, `color.y` |
//! | `msTemperatureMeasurement` | `measuredValue` | `temperature` (°C) |
//! | `msRelativeHumidity` | `measuredValue` | `humidity` (%) |
//! | `msPressureMeasurement` | `measuredValue` | `pressure` (hPa) |
//! | `msIlluminanceMeasurement` | `measuredValue` | `illuminance` |
//! | `msOccupancySensing` | `occupancy` | `occupancy` |
//! | `genPowerCfg` | `batteryPercentageRemaining` | `battery` (%) |

use crate::message::ZigbeeMessage;
use meshbridge_core::{AttrMap, AttrValue, StateDelta};
use serde_json::{Map, Value};

type Data = Map<String, Value>;

struct Converter {
    cluster: &'static str,
    convert: fn(&Data, &mut StateDelta),
}

const CONVERTERS: &[Converter] = &[
    Converter {
        cluster: "genOnOff",
        convert: on_off,
    },
    Converter {
        cluster: "genLevelCtrl",
        convert: level,
    },
    Converter {
        cluster: "lightingColorCtrl",
        convert: color,
    },
    Converter {
        cluster: "msTemperatureMeasurement",
        convert: temperature,
    },
    Converter {
        cluster: "msRelativeHumidity",
        convert: humidity,
    },
    Converter {
        cluster: "msPressureMeasurement",
        convert: pressure,
    },
    Converter {
        cluster: "msIlluminanceMeasurement",
        convert: illuminance,
    },
    Converter {
        cluster: "msOccupancySensing",
        convert: occupancy,
    },
    Converter {
        cluster: "genPowerCfg",
        convert: battery,
    },
];

/// Convert a decoded message into a state delta.
///
/// Returns an empty delta for non-attribute messages and unknown clusters.
#[must_use]
pub fn convert(msg: &ZigbeeMessage) -> StateDelta {
    let mut delta = StateDelta::new();
    if !msg.msg_type.is_attribute_update() {
        return delta;
    }

    for converter in CONVERTERS.iter().filter(|c| c.cluster == msg.cluster) {
        (converter.convert)(&msg.data, &mut delta);
    }
    delta
}

/// Whether a converter exists for `cluster`.
#[must_use]
pub fn supports(cluster: &str) -> bool {
    CONVERTERS.iter().any(|c| c.cluster == cluster)
}

fn on_off(data: &Data, delta: &mut StateDelta) {
    if let Some(on) = data.get("onOff").and_then(Value::as_i64) {
        delta.insert("state", if on == 1 { "ON" } else { "OFF" });
    }
}

fn level(data: &Data, delta: &mut StateDelta) {
    if let Some(level) = data.get("currentLevel").and_then(Value::as_i64) {
        delta.insert("brightness", level);
    }
}

fn color(data: &Data, delta: &mut StateDelta) {
    if let Some(mireds) = data.get("colorTemperature").and_then(Value::as_i64) {
        delta.insert("color_temp", mireds);
    }

    let mut xy = AttrMap::new();
    if let Some(x) = data.get("currentX").and_then(Value::as_f64) {
        xy.insert("x", round(x / 65535.0, 4));
    }
    if let Some(y) = data.get("currentY").and_then(Value::as_f64) {
        xy.insert("y", round(y / 65535.0, 4));
    }
    if !xy.is_empty() {
        delta.insert("color", AttrValue::Map(xy));
    }
}

fn temperature(data: &Data, delta: &mut StateDelta) {
    if let Some(value) = data.get("measuredValue").and_then(Value::as_f64) {
        delta.insert("temperature", round(value / 100.0, 2));
    }
}

fn humidity(data: &Data, delta: &mut StateDelta) {
    if let Some(value) = data.get("measuredValue").and_then(Value::as_f64) {
        delta.insert("humidity", round(value / 100.0, 2));
    }
}

fn pressure(data: &Data, delta: &mut StateDelta) {
    if let Some(value) = data.get("measuredValue").and_then(Value::as_f64) {
        delta.insert("pressure", round(value, 2));
    }
}

fn illuminance(data: &Data, delta: &mut StateDelta) {
    if let Some(value) = data.get("measuredValue").and_then(Value::as_f64) {
        delta.insert("illuminance", round(value, 2));
    }
}

fn occupancy(data: &Data, delta: &mut StateDelta) {
    if let Some(value) = data.get("occupancy").and_then(Value::as_i64) {
        delta.insert("occupancy", value & 1 == 1);
    }
}

fn battery(data: &Data, delta: &mut StateDelta) {
    // Reported in half-percent units
    if let Some(value) = data.get("batteryPercentageRemaining").and_then(Value::as_f64) {
        delta.insert("battery", round(value / 2.0, 1));
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, ZigbeeDevice};
    use serde_json::json;

    fn message(cluster: &str, msg_type: MessageType, data: Value) -> ZigbeeMessage {
        let Value::Object(data) = data else {
            panic!("data must be an object");
        };
        ZigbeeMessage {
            msg_type,
            cluster: cluster.to_string(),
            device: ZigbeeDevice {
                ieee_addr: "0x00158d0001".to_string(),
                model_id: "lumi.weather".to_string(),
            },
            endpoint: 1,
            data,
        }
    }

    #[test]
    fn on_off_states() {
        let on = convert(&message("genOnOff", MessageType::DevChange, json!({"onOff": 1})));
        assert_eq!(on.get("state"), Some(&AttrValue::from("ON")));

        let off = convert(&message("genOnOff", MessageType::AttReport, json!({"onOff": 0})));
        assert_eq!(off.get("state"), Some(&AttrValue::from("OFF")));
    }

    #[test]
    fn sensor_scaling() {
        let temp = convert(&message(
            "msTemperatureMeasurement",
            MessageType::AttReport,
            json!({"measuredValue": 2154}),
        ));
        assert_eq!(temp.get("temperature"), Some(&AttrValue::Float(21.54)));

        let hum = convert(&message(
            "msRelativeHumidity",
            MessageType::AttReport,
            json!({"measuredValue": 4567}),
        ));
        assert_eq!(hum.get("humidity"), Some(&AttrValue::Float(45.67)));

        let battery = convert(&message(
            "genPowerCfg",
            MessageType::ReadRsp,
            json!({"batteryPercentageRemaining": 187}),
        ));
        assert_eq!(battery.get("battery"), Some(&AttrValue::Float(93.5)));

        let pressure = convert(&message(
            "msPressureMeasurement",
            MessageType::AttReport,
            json!({"measuredValue": 1013.256}),
        ));
        assert_eq!(pressure.get("pressure"), Some(&AttrValue::Float(1013.26)));

        let lux = convert(&message(
            "msIlluminanceMeasurement",
            MessageType::AttReport,
            json!({"measuredValue": 350}),
        ));
        assert_eq!(lux.get("illuminance"), Some(&AttrValue::Float(350.0)));
    }

    #[test]
    fn color_is_nested() {
        let delta = convert(&message(
            "lightingColorCtrl",
            MessageType::AttReport,
            json!({"colorTemperature": 370, "currentX": 29969, "currentY": 26869}),
        ));

        assert_eq!(delta.keys().collect::<Vec<_>>(), vec!["color_temp", "color"]);
        let Some(AttrValue::Map(xy)) = delta.get("color") else {
            panic!("color should be a map");
        };
        assert_eq!(xy.get("x"), Some(&AttrValue::Float(0.4573)));
        assert_eq!(xy.get("y"), Some(&AttrValue::Float(0.41)));
    }

    #[test]
    fn unsupported_inputs_yield_empty_delta() {
        assert!(convert(&message("genScenes", MessageType::AttReport, json!({"count": 1}))).is_empty());
        assert!(convert(&message("genOnOff", MessageType::Other, json!({"onOff": 1}))).is_empty());
        assert!(supports("genOnOff"));
        assert!(!supports("genScenes"));
    }
}
