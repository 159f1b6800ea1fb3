use serde_json::{Map, Value};
use tracing::debug;

use crate::normalize::{coerce_bool, coerce_float, normalize};
use crate::stream::JsonObject;

const TEMPERATURE_SOURCES: &[&str] = &[
    "Temperature",
    "temperature",
    "temp",
    "TempCurrent",
    "Temp1Current",
    "Temp4Current",
];
const HUMIDITY_SOURCES: &[&str] = &["Humidity", "humidity", "hum"];
const VOLTAGE_SOURCES: &[&str] = &["Voltage", "voltage", "v", "InputVoltage", "SystemVoltage"];
const POWER_SOURCES: &[&str] = &["Power", "power", "on", "Run", "RunState"];

const STATE_TEXT_SOURCES: &[&str] = &["State", "Status", "Mode", "RunString", "ThermostatMode"];
const POWER_DEBUG_KEYS: &[&str] = &["Run", "RunState", "Power", "GPout1", "GPout2"];

/// Fields the heater pushes on its own every 10-13 s, without a refresh.
pub const PERIODIC_UPDATE_FIELDS: &[&str] = &["IP_STARSSI", "Pressure", "Humidity"];

/// Immutable snapshot of everything the heater has reported.
///
/// `merge` never mutates; it builds a new snapshot so readers holding the
/// previous one never see a half-applied update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaterState {
    temperature: Option<f64>,
    humidity: Option<f64>,
    voltage: Option<f64>,
    power: Option<bool>,
    raw: JsonObject,
    normalized: JsonObject,
}

/// Scalars pulled from one normalized payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Scalars {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub voltage: Option<f64>,
    pub power: Option<bool>,
}

impl HeaterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, payload: &JsonObject) -> HeaterState {
        let normalized = normalize(payload);
        let parsed = extract_scalars(&normalized);

        let power_keys: Map<String, Value> = payload
            .iter()
            .filter(|(k, _)| POWER_DEBUG_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !power_keys.is_empty() {
            let norm: Map<String, Value> = power_keys
                .keys()
                .map(|k| (k.clone(), normalized.get(k).cloned().unwrap_or(Value::Null)))
                .collect();
            let raw = Value::Object(power_keys);
            let norm = Value::Object(norm);
            debug!(raw = %raw, normalized = %norm, "state keys");
        }

        let mut raw = self.raw.clone();
        raw.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut merged = self.normalized.clone();
        merged.extend(normalized);

        HeaterState {
            temperature: parsed.temperature.or(self.temperature),
            humidity: parsed.humidity.or(self.humidity),
            voltage: parsed.voltage.or(self.voltage),
            power: parsed.power.or(self.power),
            raw,
            normalized: merged,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn voltage(&self) -> Option<f64> {
        self.voltage
    }

    pub fn power(&self) -> Option<bool> {
        self.power
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn normalized(&self, key: &str) -> Option<&Value> {
        self.normalized.get(key)
    }

    pub fn raw_fields(&self) -> &JsonObject {
        &self.raw
    }

    pub fn normalized_fields(&self) -> &JsonObject {
        &self.normalized
    }

    /// Normalized value when there is one, otherwise the raw value.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.normalized.get(key).or_else(|| self.raw.get(key))
    }

    /// Human-readable run state, from whichever status-like key the firmware sends.
    pub fn state_text(&self) -> Option<String> {
        self.raw_value(STATE_TEXT_SOURCES).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// First key holding a non-null value.
    pub fn raw_value(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.raw.get(*k).filter(|v| !v.is_null()))
    }

    pub fn raw_bool(&self, keys: &[&str]) -> Option<bool> {
        self.raw_value(keys).and_then(coerce_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// First present key decides; an unparsable value there yields `None`
/// rather than falling through to the next key.
pub(crate) fn extract_scalars(normalized: &JsonObject) -> Scalars {
    let first = |keys: &[&str]| keys.iter().find_map(|k| normalized.get(*k));
    Scalars {
        temperature: first(TEMPERATURE_SOURCES).and_then(coerce_float),
        humidity: first(HUMIDITY_SOURCES).and_then(coerce_float),
        voltage: first(VOLTAGE_SOURCES).and_then(coerce_float),
        power: first(POWER_SOURCES).and_then(coerce_bool),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Heat,
    Off,
}

impl RunMode {
    pub fn as_device_str(&self) -> &'static str {
        match self {
            RunMode::Heat => "heat",
            RunMode::Off => "off",
        }
    }

    pub fn from_device_str(s: &str) -> Option<Self> {
        match s {
            "heat" => Some(RunMode::Heat),
            "off" => Some(RunMode::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Deadband,
    Standard,
    StopStart,
    LinearHz,
}

impl ThermostatMode {
    pub fn as_device_str(&self) -> &'static str {
        match self {
            ThermostatMode::Deadband => "Deadband",
            ThermostatMode::Standard => "Standard",
            ThermostatMode::StopStart => "Stop/Start",
            ThermostatMode::LinearHz => "Linear Hz",
        }
    }

    pub fn from_device_str(s: &str) -> Option<Self> {
        match s {
            "Deadband" => Some(ThermostatMode::Deadband),
            "Standard" => Some(ThermostatMode::Standard),
            "Stop/Start" => Some(ThermostatMode::StopStart),
            "Linear Hz" => Some(ThermostatMode::LinearHz),
            _ => None,
        }
    }
}
