use afterburner::normalize::normalize;
use afterburner::{HeaterState, JsonObject, JsonObjectStream};
use serde_json::{json, Value};

fn object(v: Value) -> JsonObject {
    v.as_object().cloned().unwrap()
}

/// Feed a notification-style byte stream through reassembly and merge.
fn replay(chunks: &[&str]) -> HeaterState {
    let mut stream = JsonObjectStream::new();
    let mut state = HeaterState::new();
    for chunk in chunks {
        for payload in stream.feed(chunk) {
            state = state.merge(&payload);
        }
    }
    state
}

#[test]
fn fragmented_status_dump() {
    let state = replay(&[
        r#"{"TempCurrent":"19.#"#,
        r#"5","Humidity":4"#,
        r#"4}{"Run":"heat","Input"#,
        r#"Voltage":12.6}"#,
    ]);
    // the first object fails temperature coercion and stays unset
    assert_eq!(state.temperature(), None);
    assert_eq!(state.raw("TempCurrent"), Some(&json!("19.#5")));
    assert_eq!(state.humidity(), Some(44.0));
    assert_eq!(state.voltage(), Some(12.6));
    assert_eq!(state.power(), Some(true));
}

#[test]
fn later_reports_override_earlier() {
    let state = replay(&[
        r#"{"TempCurrent":18.0,"Run":"heat"}"#,
        r#"{"TempCurrent":19.5}"#,
        r#"{"Run":"off"}"#,
    ]);
    assert_eq!(state.temperature(), Some(19.5));
    assert_eq!(state.power(), Some(false));
    assert_eq!(state.normalized("Run"), Some(&json!(false)));
    assert_eq!(state.raw("Run"), Some(&json!("off")));
}

#[test]
fn garbage_between_objects_is_skipped() {
    let state = replay(&["noise{\"Humidity\":40}\r\n", "\u{0}{\"Pressure\":1013.2}"]);
    assert_eq!(state.humidity(), Some(40.0));
    assert_eq!(state.value("Pressure"), Some(&json!(1013.2)));
}

#[test]
fn missing_fields_keep_previous_values() {
    let first = HeaterState::new().merge(&object(json!({"Voltage": "12.4", "Power": "on"})));
    let second = first.merge(&object(json!({"FanRPM": "1500"})));
    assert_eq!(second.voltage(), Some(12.4));
    assert_eq!(second.power(), Some(true));
    assert_eq!(second.normalized("FanRPM"), Some(&json!(1500)));
    // the earlier snapshot is untouched
    assert!(first.normalized("FanRPM").is_none());
}

#[test]
fn normalized_cyclic_fields() {
    let n = normalize(&object(json!({
        "CyclicTemp": "68",
        "ThermostatOvertemp": 2,
        "ThermostatUndertemp": -1,
        "FuelAlarm": 0,
        "SysTotalFuel": 12.5,
    })));
    assert_eq!(n["CyclicTemp"], json!(68.0));
    assert_eq!(n["CyclicRestartTemp"], json!(68.0));
    assert_eq!(n["CyclicStopTemp"], json!(68.0));
    assert_eq!(n["CyclicOff"], json!(2.0));
    assert_eq!(n["CyclicOn"], json!(-1.0));
    assert_eq!(n["FuelAlarm"], json!("0: OK"));
    assert_eq!(n["FuelUsage"], json!(12.5));
    assert_eq!(n["TotalFuelUsage"], json!(12.5));
}

#[test]
fn unknown_keys_pass_through() {
    let n = normalize(&object(json!({"Vendor": {"Build": 7}, "Humidity": "n/a"})));
    assert_eq!(n["Vendor"], json!({"Build": 7}));
    assert_eq!(n["Humidity"], Value::Null);
}
