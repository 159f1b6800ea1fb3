use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::stream::JsonObject;
use crate::types::{RunMode, ThermostatMode};
use crate::{Error, Result};

pub const SERVICE_UUID: &str = "FFE0";
pub const CHAR_NOTIFY_UUID: &str = "FFE1";
pub const CHAR_WRITE_UUID: &str = "FFE1";
pub const CHAR_WRITE_ALT_UUID: &str = "FFE2";

const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

pub const DEFAULT_WS_PATH: &str = "/";
pub const DEFAULT_WS_PORT: u16 = 81;
pub const DEFAULT_WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WS_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_BLE_WRITE_CHAR: &str = "FFE1";
pub const DEFAULT_BLE_WRITE_WITH_RESPONSE: bool = true;
pub const DEFAULT_BLE_APPEND_NEWLINE: bool = false;
pub const DEFAULT_BLE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BLE_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// BLE does not push state changes, so it is polled twice as often.
pub const DEFAULT_POLL_INTERVAL_BLE: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL_WS: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Expand a 16-bit short UUID to the full Bluetooth base form; longer UUIDs are only lowercased.
pub fn format_uuid(uuid: &str) -> String {
    let lower = uuid.to_ascii_lowercase();
    if lower.len() == 4 {
        format!("0000{lower}{BLUETOOTH_BASE_SUFFIX}")
    } else {
        lower
    }
}

pub fn resolve_write_uuid(write_char: &str) -> &'static str {
    if write_char.eq_ignore_ascii_case(CHAR_WRITE_ALT_UUID) {
        CHAR_WRITE_ALT_UUID
    } else {
        CHAR_WRITE_UUID
    }
}

pub fn normalize_path(path: Option<&str>) -> String {
    match path {
        None | Some("") => DEFAULT_WS_PATH.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => format!("/{p}"),
    }
}

/// `None` for the port leaves it out of the URL, so the scheme default applies.
pub fn build_ws_url(host: &str, port: Option<u16>, path: &str) -> String {
    match port {
        Some(port) => format!("ws://{host}:{port}{path}"),
        None => format!("ws://{host}{path}"),
    }
}

/// Parse a configured init/refresh message. Anything but a JSON object is ignored.
pub fn parse_init_message(text: &str, transport: &str) -> Option<JsonObject> {
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(transport, "init JSON must be an object; ignoring");
            None
        }
        Err(e) => {
            warn!(transport, error = %e, "invalid init JSON; ignoring");
            None
        }
    }
}

/// Parse a user-supplied command. The device only accepts flat objects.
pub fn command_from_json(text: &str) -> Result<JsonObject> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Protocol(format!(
            "command must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn object(v: Value) -> JsonObject {
    match v {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn flag(enabled: bool) -> u8 {
    u8::from(enabled)
}

pub fn build_command(key: &str, value: impl Into<Value>) -> JsonObject {
    let mut map = JsonObject::new();
    map.insert(key.to_string(), value.into());
    map
}

pub fn refresh_command() -> JsonObject {
    object(json!({ "Refresh": 1 }))
}

pub fn run_command(mode: RunMode) -> JsonObject {
    object(json!({ "Run": mode.as_device_str() }))
}

/// Temperatures are in the device's configured unit (Fahrenheit on stock firmware).
pub fn cyclic_temp_command(temp: f64) -> JsonObject {
    object(json!({ "CyclicTemp": temp }))
}

pub fn cyclic_on_command(temp: f64) -> JsonObject {
    object(json!({ "CyclicOn": temp }))
}

pub fn cyclic_off_command(temp: f64) -> JsonObject {
    object(json!({ "CyclicOff": temp }))
}

pub fn cyclic_enabled_command(enabled: bool) -> JsonObject {
    object(json!({ "CyclicEnb": flag(enabled) }))
}

pub fn frost_enable_command(enabled: bool) -> JsonObject {
    object(json!({ "FrostEnable": flag(enabled) }))
}

pub fn frost_on_command(temp: f64) -> JsonObject {
    object(json!({ "FrostOn": temp }))
}

pub fn frost_rise_command(temp: f64) -> JsonObject {
    object(json!({ "FrostRise": temp }))
}

pub fn frost_target_command(temp: f64) -> JsonObject {
    object(json!({ "FrostTarget": temp }))
}

pub fn thermostat_command(enabled: bool) -> JsonObject {
    object(json!({ "Thermostat": flag(enabled) }))
}

pub fn thermostat_mode_command(mode: ThermostatMode) -> JsonObject {
    object(json!({ "ThermostatMode": mode.as_device_str() }))
}

/// `None` turns fixed demand off.
pub fn fixed_demand_command(value: Option<f64>) -> JsonObject {
    object(json!({ "FixedDemand": value }))
}

pub fn gpout1_command(on: bool) -> JsonObject {
    object(json!({ "GPout1": flag(on) }))
}

pub fn gpout2_command(on: bool) -> JsonObject {
    object(json!({ "GPout2": flag(on) }))
}
