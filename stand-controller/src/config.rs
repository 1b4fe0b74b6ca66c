//! Device configuration.
//!
//! The stand is described by a JSON document naming the device, the sensor
//! channels (grouped by kind) and the valves. The document is consumed
//! read-only at boot: it is parsed into raw serde structures and then
//! validated into the typed configuration used by the rest of the process.

use crate::adc::AdcInput;
use hotfire_protocol::types::ValveState;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Number of multiplexed analog input pins per ADC device.
pub(crate) const ADC_PIN_COUNT: u8 = 4;

/// Most ADC devices one stand can carry.
pub(crate) const MAX_ADC_COUNT: usize = 8;

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate channel id {0:?}")]
    DuplicateChannel(String),

    #[error("duplicate valve id {0:?}")]
    DuplicateValve(String),

    #[error("channel {channel:?}: pin {pin} out of range")]
    PinOutOfRange { channel: String, pin: i64 },

    #[error("channel {channel:?}: ADC index {index} out of range")]
    AdcIndexOutOfRange { channel: String, index: usize },

    #[error("channel {channel:?}: unknown thermocouple type {tc_type:?}")]
    UnknownThermocoupleType { channel: String, tc_type: String },

    #[error("valve {valve:?}: unknown valve type {kind:?}")]
    UnknownValveKind { valve: String, kind: String },

    #[error("valve {valve:?}: unknown default state {state:?}")]
    UnknownValveState { valve: String, state: String },

    #[error("channel {channel:?}: {field} must be positive")]
    NonPositiveParameter {
        channel: String,
        field: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThermocoupleType {
    K,
    T,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SensorKind {
    Thermocouple {
        tc_type: ThermocoupleType,
    },
    PressureTransducer {
        max_pressure_psi: f32,
    },
    LoadCell {
        rating_newtons: f32,
        excitation_volts: f32,
        sensitivity_mv_per_v: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SensorChannel {
    pub(crate) id: String,
    pub(crate) adc_index: usize,
    pub(crate) input: AdcInput,
    pub(crate) kind: SensorKind,
    pub(crate) unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValveKind {
    Solenoid,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValveConfig {
    pub(crate) id: String,
    pub(crate) pin: u8,
    pub(crate) default_state: ValveState,
    pub(crate) kind: ValveKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeviceConfig {
    pub(crate) device_id: String,
    pub(crate) sensors: Vec<SensorChannel>,
    pub(crate) valves: Vec<ValveConfig>,
    /// One past the highest ADC index any channel references.
    pub(crate) adc_count: usize,
}

// Raw document shape, prior to validation. BTreeMaps give the channels a
// stable order within each kind group.

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "deviceName")]
    device_name: String,
    #[serde(rename = "sensorInfo", default)]
    sensor_info: RawSensorInfo,
    #[serde(default)]
    valves: BTreeMap<String, RawValve>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSensorInfo {
    #[serde(default)]
    thermocouples: BTreeMap<String, RawThermocouple>,
    #[serde(rename = "pressureTransducers", default)]
    pressure_transducers: BTreeMap<String, RawPressureTransducer>,
    #[serde(rename = "loadCells", default)]
    load_cells: BTreeMap<String, RawLoadCell>,
}

#[derive(Debug, Deserialize)]
struct RawThermocouple {
    #[serde(rename = "ADCIndex")]
    adc_index: usize,
    #[serde(rename = "highPin")]
    high_pin: i64,
    #[serde(rename = "lowPin")]
    low_pin: i64,
    #[serde(rename = "type")]
    tc_type: String,
    units: String,
}

#[derive(Debug, Deserialize)]
struct RawPressureTransducer {
    #[serde(rename = "ADCIndex")]
    adc_index: usize,
    pin: i64,
    #[serde(rename = "maxPressure_PSI")]
    max_pressure_psi: f32,
    units: String,
}

#[derive(Debug, Deserialize)]
struct RawLoadCell {
    #[serde(rename = "ADCIndex")]
    adc_index: usize,
    #[serde(rename = "highPin")]
    high_pin: i64,
    #[serde(rename = "lowPin")]
    low_pin: i64,
    #[serde(rename = "loadRating_N")]
    load_rating_newtons: f32,
    #[serde(rename = "excitation_V")]
    excitation_volts: f32,
    #[serde(rename = "sensitivity_vV")]
    sensitivity_mv_per_v: f32,
    units: String,
}

#[derive(Debug, Deserialize)]
struct RawValve {
    pin: u8,
    #[serde(rename = "defaultState")]
    default_state: String,
    #[serde(rename = "type")]
    kind: String,
}

impl DeviceConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    pub(crate) fn from_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_json::from_str(text)?;
        Self::validate(raw)
    }

    fn validate(raw: RawDocument) -> Result<Self, ConfigError> {
        let mut sensors = Vec::new();

        for (id, tc) in raw.sensor_info.thermocouples {
            let tc_type = match tc.tc_type.as_str() {
                "K" => ThermocoupleType::K,
                "T" => ThermocoupleType::T,
                other => {
                    return Err(ConfigError::UnknownThermocoupleType {
                        channel: id,
                        tc_type: other.to_owned(),
                    })
                }
            };
            let input = differential_input(&id, tc.high_pin, tc.low_pin)?;
            sensors.push(SensorChannel {
                id,
                adc_index: tc.adc_index,
                input,
                kind: SensorKind::Thermocouple { tc_type },
                unit: tc.units,
            });
        }

        for (id, pt) in raw.sensor_info.pressure_transducers {
            if pt.max_pressure_psi <= 0.0 {
                return Err(ConfigError::NonPositiveParameter {
                    channel: id,
                    field: "maxPressure_PSI",
                });
            }
            let input = AdcInput::SingleEnded(checked_pin(&id, pt.pin)?);
            sensors.push(SensorChannel {
                id,
                adc_index: pt.adc_index,
                input,
                kind: SensorKind::PressureTransducer {
                    max_pressure_psi: pt.max_pressure_psi,
                },
                unit: pt.units,
            });
        }

        for (id, lc) in raw.sensor_info.load_cells {
            for (field, value) in [
                ("loadRating_N", lc.load_rating_newtons),
                ("excitation_V", lc.excitation_volts),
                ("sensitivity_vV", lc.sensitivity_mv_per_v),
            ] {
                if value <= 0.0 {
                    return Err(ConfigError::NonPositiveParameter {
                        channel: id,
                        field,
                    });
                }
            }
            let input = differential_input(&id, lc.high_pin, lc.low_pin)?;
            sensors.push(SensorChannel {
                id,
                adc_index: lc.adc_index,
                input,
                kind: SensorKind::LoadCell {
                    rating_newtons: lc.load_rating_newtons,
                    excitation_volts: lc.excitation_volts,
                    sensitivity_mv_per_v: lc.sensitivity_mv_per_v,
                },
                unit: lc.units,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for channel in &sensors {
            if !seen.insert(channel.id.clone()) {
                return Err(ConfigError::DuplicateChannel(channel.id.clone()));
            }
            if channel.adc_index >= MAX_ADC_COUNT {
                return Err(ConfigError::AdcIndexOutOfRange {
                    channel: channel.id.clone(),
                    index: channel.adc_index,
                });
            }
        }

        let adc_count = sensors
            .iter()
            .map(|channel| channel.adc_index + 1)
            .max()
            .unwrap_or(0);

        let mut valves = Vec::new();
        for (id, valve) in raw.valves {
            let default_state = match valve.default_state.to_uppercase().as_str() {
                "OPEN" => ValveState::Open,
                "CLOSED" => ValveState::Closed,
                other => {
                    return Err(ConfigError::UnknownValveState {
                        valve: id,
                        state: other.to_owned(),
                    })
                }
            };
            let kind = match valve.kind.to_lowercase().as_str() {
                "solenoid" => ValveKind::Solenoid,
                other => {
                    return Err(ConfigError::UnknownValveKind {
                        valve: id,
                        kind: other.to_owned(),
                    })
                }
            };
            valves.push(ValveConfig {
                id,
                pin: valve.pin,
                default_state,
                kind,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for valve in &valves {
            if !seen.insert(valve.id.clone()) {
                return Err(ConfigError::DuplicateValve(valve.id.clone()));
            }
        }

        Ok(Self {
            device_id: raw.device_name,
            sensors,
            valves,
            adc_count,
        })
    }
}

fn checked_pin(channel: &str, pin: i64) -> Result<u8, ConfigError> {
    if (0..i64::from(ADC_PIN_COUNT)).contains(&pin) {
        Ok(pin as u8)
    } else {
        Err(ConfigError::PinOutOfRange {
            channel: channel.to_owned(),
            pin,
        })
    }
}

/// A low pin of -1 marks a ground-referenced (single-ended) measurement.
fn differential_input(channel: &str, high: i64, low: i64) -> Result<AdcInput, ConfigError> {
    let high = checked_pin(channel, high)?;
    if low == -1 {
        Ok(AdcInput::SingleEnded(high))
    } else {
        Ok(AdcInput::Differential(high, checked_pin(channel, low)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        "deviceName": "StandA",
        "sensorInfo": {
            "thermocouples": {
                "TCEngine": { "ADCIndex": 1, "highPin": 0, "lowPin": 1, "type": "K", "units": "C" }
            },
            "pressureTransducers": {
                "PTFill": { "ADCIndex": 0, "pin": 2, "maxPressure_PSI": 1000, "units": "PSI" }
            },
            "loadCells": {
                "LCThrust": {
                    "ADCIndex": 2, "highPin": 0, "lowPin": 1,
                    "loadRating_N": 4448.0, "excitation_V": 10.0, "sensitivity_vV": 2.0,
                    "units": "N"
                }
            }
        },
        "valves": {
            "AVDump": { "pin": 4, "defaultState": "OPEN", "type": "solenoid" },
            "AVFeed": { "pin": 5, "defaultState": "CLOSED", "type": "solenoid" }
        }
    }"#;

    #[test]
    fn parses_and_validates_example() {
        let config = DeviceConfig::from_str(EXAMPLE).unwrap();

        assert_eq!(config.device_id, "StandA");
        assert_eq!(config.sensors.len(), 3);
        assert_eq!(config.valves.len(), 2);
        assert_eq!(config.adc_count, 3);

        let tc = config.sensors.iter().find(|c| c.id == "TCEngine").unwrap();
        assert_eq!(tc.input, AdcInput::Differential(0, 1));
        assert_eq!(
            tc.kind,
            SensorKind::Thermocouple {
                tc_type: ThermocoupleType::K
            }
        );

        let pt = config.sensors.iter().find(|c| c.id == "PTFill").unwrap();
        assert_eq!(pt.input, AdcInput::SingleEnded(2));

        let dump = config.valves.iter().find(|v| v.id == "AVDump").unwrap();
        assert_eq!(dump.default_state, ValveState::Open);
    }

    #[test]
    fn rejects_unknown_thermocouple_type() {
        let text = r#"{
            "deviceName": "StandA",
            "sensorInfo": {
                "thermocouples": {
                    "TC1": { "ADCIndex": 0, "highPin": 0, "lowPin": 1, "type": "Q", "units": "C" }
                }
            }
        }"#;
        assert!(matches!(
            DeviceConfig::from_str(text),
            Err(ConfigError::UnknownThermocoupleType { .. })
        ));
    }

    #[test]
    fn rejects_bad_valve_default() {
        let text = r#"{
            "deviceName": "StandA",
            "valves": {
                "AV1": { "pin": 4, "defaultState": "AJAR", "type": "solenoid" }
            }
        }"#;
        assert!(matches!(
            DeviceConfig::from_str(text),
            Err(ConfigError::UnknownValveState { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_pin() {
        let text = r#"{
            "deviceName": "StandA",
            "sensorInfo": {
                "pressureTransducers": {
                    "PT1": { "ADCIndex": 0, "pin": 9, "maxPressure_PSI": 500, "units": "PSI" }
                }
            }
        }"#;
        assert!(matches!(
            DeviceConfig::from_str(text),
            Err(ConfigError::PinOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_adc_index() {
        let text = r#"{
            "deviceName": "StandA",
            "sensorInfo": {
                "pressureTransducers": {
                    "PT1": { "ADCIndex": 12, "pin": 0, "maxPressure_PSI": 500, "units": "PSI" }
                }
            }
        }"#;
        assert!(matches!(
            DeviceConfig::from_str(text),
            Err(ConfigError::AdcIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_calibration_parameter() {
        let text = r#"{
            "deviceName": "StandA",
            "sensorInfo": {
                "loadCells": {
                    "LC1": {
                        "ADCIndex": 0, "highPin": 0, "lowPin": 1,
                        "loadRating_N": 4448.0, "excitation_V": 0.0, "sensitivity_vV": 2.0,
                        "units": "N"
                    }
                }
            }
        }"#;
        assert!(matches!(
            DeviceConfig::from_str(text),
            Err(ConfigError::NonPositiveParameter { .. })
        ));
    }
}
