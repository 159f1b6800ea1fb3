use std::time::Duration;

use afterburner::transport::default_poll_interval;
use afterburner::{
    BleConfig, Error, HeaterClient, MessageLogMode, TransportConfig, TransportKind,
    WebSocketConfig,
};
use serde_json::json;

#[test]
fn websocket_config_from_json() {
    let config = TransportConfig::from_json(json!({
        "transport": "websocket",
        "host": "heater.local",
        "token": "abc",
        "init_message": "{\"Refresh\":1}"
    }))
    .unwrap();
    assert_eq!(config.kind(), TransportKind::WebSocket);
    let TransportConfig::WebSocket(ws) = config else {
        panic!("expected websocket");
    };
    assert_eq!(ws.url(), "ws://heater.local:81/");
    assert_eq!(ws.token.as_deref(), Some("abc"));
    assert_eq!(ws.connect_timeout, Duration::from_secs(10));
}

#[test]
fn ble_config_from_json() {
    let config = TransportConfig::from_json(json!({
        "transport": "ble",
        "address": "AA:BB:CC:DD:EE:FF",
        "write_char": "FFE2",
        "write_with_response": false,
        "append_newline": true
    }))
    .unwrap();
    assert_eq!(config.kind(), TransportKind::Ble);
    let TransportConfig::Ble(ble) = config else {
        panic!("expected ble");
    };
    assert_eq!(
        ble.write_uuid().unwrap().to_string(),
        "0000ffe2-0000-1000-8000-00805f9b34fb"
    );
    assert!(!ble.write_with_response);
    assert!(ble.append_newline);
    assert!(ble.init_message.is_some());
}

#[test]
fn invalid_init_message_is_ignored() {
    let config = TransportConfig::from_json(json!({
        "transport": "websocket",
        "host": "heater.local",
        "init_message": "not json"
    }))
    .unwrap();
    let TransportConfig::WebSocket(ws) = config else {
        panic!("expected websocket");
    };
    assert!(ws.init_message.is_none());
}

#[test]
fn unsupported_transport() {
    let err = TransportConfig::from_json(json!({"transport": "zigbee"})).unwrap_err();
    assert!(matches!(err, Error::Config(ref msg) if msg.contains("zigbee")));
}

#[test]
fn builder_validates_transport() {
    assert!(matches!(
        HeaterClient::builder().build(),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        HeaterClient::builder().ble(BleConfig::new("")).build(),
        Err(Error::Config(_))
    ));

    let mut ws = WebSocketConfig::new("heater.local");
    ws.token = Some("line\nbreak".into());
    assert!(matches!(
        HeaterClient::builder().websocket(ws).build(),
        Err(Error::Config(_))
    ));
}

#[test]
fn unwritable_message_log_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("log.ndjson");
    let result = HeaterClient::builder()
        .websocket(WebSocketConfig::new("heater.local"))
        .message_log(MessageLogMode::Diffed, path.to_str().unwrap())
        .build();
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn poll_intervals() {
    assert_eq!(TransportKind::Ble.default_poll_interval(), Duration::from_secs(30));
    assert_eq!(
        TransportKind::WebSocket.default_poll_interval(),
        Duration::from_secs(60)
    );
    assert_eq!(default_poll_interval("ble"), Duration::from_secs(30));
    assert_eq!(default_poll_interval("serial"), Duration::from_secs(60));
}
