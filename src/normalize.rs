use serde_json::{Map, Value};

use crate::stream::JsonObject;

pub const TEMPERATURE_KEYS: &[&str] = &[
    "Temperature",
    "temperature",
    "temp",
    "TempCurrent",
    "TempDesired",
    "TempBody",
    "Temp1Current",
    "Temp4Current",
    "FrostRise",
    "FrostOn",
    "FrostTarget",
    "CyclicTemp",
    "CyclicOn",
    "CyclicOff",
    "ThermMin",
    "ThermMax",
    "ThermostatOvertemp",
    "ThermostatUndertemp",
    "AbsCyclicOn",
    "AbsCyclicOff",
];

pub const BOOL_KEYS: &[&str] = &[
    "Power",
    "power",
    "on",
    "Run",
    "RunState",
    "CyclicEnb",
    "FrostEnable",
    "Thermostat",
    "GPout1",
    "GPout2",
    "GPin1",
    "GPin2",
    "RunReq",
    "FrostRun",
    "FrostHold",
];

pub const INT_KEYS: &[&str] = &["FanRPM"];

pub const FLOAT_KEYS: &[&str] = &[
    "Humidity",
    "humidity",
    "hum",
    "Voltage",
    "voltage",
    "v",
    "InputVoltage",
    "SystemVoltage",
    "GlowVoltage",
    "GlowCurrent",
    "PumpActual",
    "PumpFixed",
    "FuelUsage",
    "TotalFuelUsage",
    "FuelRate",
    "Altitude",
    "GPanlg",
    "Pressure",
    "FixedDemand",
    "SysTotalFuel",
];

pub const STR_KEYS: &[&str] = &[
    "FuelAlarm",
    "RunString",
    "ErrorString",
    "ThermostatMode",
    "FrostMode",
    "GPmodeIn1",
    "GPmodeIn2",
    "GPmodeOut1",
    "GPmodeOut2",
];

const TRUTHY: &[&str] = &["true", "on", "1", "yes", "heat", "heating", "running"];
const FALSY: &[&str] = &["false", "off", "0", "no", "cooling", "stopped", "idle", "standby"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Temperature,
    Bool,
    Int,
    Float,
    Str,
}

/// Which coercion a device key gets. `None` means the value passes through untouched.
pub fn classify(key: &str) -> Option<FieldKind> {
    if TEMPERATURE_KEYS.contains(&key) {
        Some(FieldKind::Temperature)
    } else if BOOL_KEYS.contains(&key) {
        Some(FieldKind::Bool)
    } else if INT_KEYS.contains(&key) {
        Some(FieldKind::Int)
    } else if FLOAT_KEYS.contains(&key) {
        Some(FieldKind::Float)
    } else if STR_KEYS.contains(&key) {
        Some(FieldKind::Str)
    } else {
        None
    }
}

/// Coerce every known field of a device payload to its typed form and fill in the
/// derived cyclic/fuel fields. Fields that fail to coerce become `null`.
pub fn normalize(payload: &JsonObject) -> JsonObject {
    let mut normalized = Map::with_capacity(payload.len());
    for (key, value) in payload {
        let coerced = match classify(key) {
            Some(FieldKind::Temperature | FieldKind::Float) => float_value(coerce_float(value)),
            Some(FieldKind::Bool) => coerce_bool(value).map_or(Value::Null, Value::Bool),
            Some(FieldKind::Int) => coerce_int(value).map_or(Value::Null, Value::from),
            Some(FieldKind::Str) => coerce_str(value).map_or(Value::Null, Value::String),
            None => value.clone(),
        };
        normalized.insert(key.clone(), coerced);
    }
    apply_derived(&mut normalized);
    normalized
}

fn apply_derived(n: &mut JsonObject) {
    let mut abs_cyclic = false;
    if let Some(v) = number(n, "AbsCyclicOn") {
        n.insert("CyclicRestartTemp".into(), v);
        abs_cyclic = true;
    }
    if let Some(v) = number(n, "AbsCyclicOff") {
        n.insert("CyclicStopTemp".into(), v);
        abs_cyclic = true;
    }

    if !abs_cyclic && let Some(v) = number(n, "ThermMin") {
        n.insert("CyclicRestartTemp".into(), v.clone());
        n.insert("CyclicStopTemp".into(), v);
    }

    if (!n.contains_key("CyclicRestartTemp") || !n.contains_key("CyclicStopTemp"))
        && let Some(v) = number(n, "CyclicTemp")
    {
        n.entry("CyclicRestartTemp").or_insert_with(|| v.clone());
        n.entry("CyclicStopTemp").or_insert(v);
    }

    if let Some(v) = number(n, "ThermostatOvertemp") {
        n.insert("CyclicOff".into(), v);
    }
    if let Some(v) = number(n, "ThermostatUndertemp") {
        n.insert("CyclicOn".into(), v);
    }

    if let Some(alarm) = n.get("FuelAlarm").filter(|v| !v.is_null()).cloned() {
        let text = match coerce_int(&alarm) {
            Some(0) => Some("0: OK".to_string()),
            Some(code) => Some(code.to_string()),
            None => coerce_str(&alarm),
        };
        n.insert("FuelAlarm".into(), text.map_or(Value::Null, Value::String));
    }

    if let Some(v) = number(n, "SysTotalFuel") {
        n.entry("FuelUsage").or_insert_with(|| v.clone());
        n.entry("TotalFuelUsage").or_insert(v);
    }
}

fn number(map: &JsonObject, key: &str) -> Option<Value> {
    map.get(key).filter(|v| v.is_number()).cloned()
}

fn float_value(f: Option<f64>) -> Value {
    f.map_or(Value::Null, Value::from)
}

pub(crate) fn coerce_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    f.is_finite().then_some(f)
}

/// Float first, then truncate, so `"1500.0"` reads as 1500.
pub(crate) fn coerce_int(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    coerce_float(value).map(|f| f.trunc() as i64)
}

pub(crate) fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            if TRUTHY.contains(&s.as_str()) {
                Some(true)
            } else if FALSY.contains(&s.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Booleans render capitalized, the way the firmware's own status strings do.
pub(crate) fn coerce_str(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn bool_table() {
        assert_eq!(coerce_bool(&json!("heat")), Some(true));
        assert_eq!(coerce_bool(&json!(" Running ")), Some(true));
        assert_eq!(coerce_bool(&json!("idle")), Some(false));
        assert_eq!(coerce_bool(&json!("STANDBY")), Some(false));
        assert_eq!(coerce_bool(&json!(0)), Some(false));
        assert_eq!(coerce_bool(&json!(1)), Some(true));
        assert_eq!(coerce_bool(&json!(0.5)), Some(true));
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!("foo")), None);
        assert_eq!(coerce_bool(&Value::Null), None);
    }

    #[test]
    fn int_tolerates_float_strings() {
        assert_eq!(coerce_int(&json!("1500.0")), Some(1500));
        assert_eq!(coerce_int(&json!(1499.9)), Some(1499));
        assert_eq!(coerce_int(&json!("abc")), None);
        assert_eq!(coerce_int(&Value::Null), None);
    }

    #[test]
    fn coercion_failures_become_null() {
        let n = normalize(&payload(json!({
            "TempCurrent": "warm",
            "Voltage": null,
            "FanRPM": "fast",
            "Run": "maybe",
            "Humidity": "45.5"
        })));
        assert_eq!(n["TempCurrent"], Value::Null);
        assert_eq!(n["Voltage"], Value::Null);
        assert_eq!(n["FanRPM"], Value::Null);
        assert_eq!(n["Run"], Value::Null);
        assert_eq!(n["Humidity"].as_f64(), Some(45.5));
    }

    #[test]
    fn typed_fields_coerced() {
        let n = normalize(&payload(json!({
            "TempCurrent": "21.5",
            "Run": "heat",
            "FanRPM": "1500.0",
            "RunString": 3,
            "Unknown": [1, 2]
        })));
        assert_eq!(n["TempCurrent"].as_f64(), Some(21.5));
        assert_eq!(n["Run"], json!(true));
        assert_eq!(n["FanRPM"], json!(1500));
        assert_eq!(n["RunString"], json!("3"));
        assert_eq!(n["Unknown"], json!([1, 2]));
    }

    #[test]
    fn string_fields_render_booleans_capitalized() {
        let n = normalize(&payload(json!({"RunString": true, "ThermostatMode": false})));
        assert_eq!(n["RunString"], json!("True"));
        assert_eq!(n["ThermostatMode"], json!("False"));
        assert_eq!(coerce_str(&json!(2.5)).as_deref(), Some("2.5"));
    }

    #[test]
    fn abs_cyclic_wins_over_therm_min() {
        let n = normalize(&payload(json!({"AbsCyclicOn": 5, "ThermMin": 1})));
        assert_eq!(n["CyclicRestartTemp"].as_f64(), Some(5.0));
        assert!(!n.contains_key("CyclicStopTemp"));
    }

    #[test]
    fn therm_min_sets_both_cyclic_fields() {
        let n = normalize(&payload(json!({"ThermMin": 1})));
        assert_eq!(n["CyclicRestartTemp"].as_f64(), Some(1.0));
        assert_eq!(n["CyclicStopTemp"].as_f64(), Some(1.0));
    }

    #[test]
    fn cyclic_temp_fills_only_missing() {
        let n = normalize(&payload(json!({"AbsCyclicOff": 30, "CyclicTemp": 22})));
        assert_eq!(n["CyclicStopTemp"].as_f64(), Some(30.0));
        assert_eq!(n["CyclicRestartTemp"].as_f64(), Some(22.0));
    }

    #[test]
    fn thermostat_limits_override_cyclic_on_off() {
        let n = normalize(&payload(json!({
            "CyclicOn": 10,
            "CyclicOff": 20,
            "ThermostatOvertemp": 25,
            "ThermostatUndertemp": "15"
        })));
        assert_eq!(n["CyclicOff"].as_f64(), Some(25.0));
        assert_eq!(n["CyclicOn"].as_f64(), Some(15.0));
    }

    #[test]
    fn fuel_alarm_codes() {
        let n = normalize(&payload(json!({"FuelAlarm": 0})));
        assert_eq!(n["FuelAlarm"], json!("0: OK"));
        let n = normalize(&payload(json!({"FuelAlarm": "3.0"})));
        assert_eq!(n["FuelAlarm"], json!("3"));
        let n = normalize(&payload(json!({"FuelAlarm": "Low"})));
        assert_eq!(n["FuelAlarm"], json!("Low"));
        let n = normalize(&payload(json!({"FuelAlarm": null})));
        assert_eq!(n["FuelAlarm"], Value::Null);
    }

    #[test]
    fn sys_total_fuel_defaults_without_overwrite() {
        let n = normalize(&payload(json!({"SysTotalFuel": 12.5, "FuelUsage": 1.0})));
        assert_eq!(n["FuelUsage"].as_f64(), Some(1.0));
        assert_eq!(n["TotalFuelUsage"].as_f64(), Some(12.5));
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let raw = payload(json!({
            "TempCurrent": "21.5",
            "Run": "heating",
            "FanRPM": "1500.0",
            "FuelAlarm": 0,
            "SysTotalFuel": "4.2",
            "CyclicTemp": 20,
            "ThermostatMode": "Deadband",
            "IP_STARSSI": -60
        }));
        let once = normalize(&raw);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn classify_tables() {
        assert_eq!(classify("CyclicTemp"), Some(FieldKind::Temperature));
        assert_eq!(classify("GPout1"), Some(FieldKind::Bool));
        assert_eq!(classify("FanRPM"), Some(FieldKind::Int));
        assert_eq!(classify("Pressure"), Some(FieldKind::Float));
        assert_eq!(classify("ErrorString"), Some(FieldKind::Str));
        assert_eq!(classify("IP_STARSSI"), None);
    }
}
