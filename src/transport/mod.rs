use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::protocol::{
    DEFAULT_POLL_INTERVAL, DEFAULT_POLL_INTERVAL_BLE, DEFAULT_POLL_INTERVAL_WS, parse_init_message,
};
use crate::stream::JsonObject;
use crate::{Error, Result};

pub mod ble;
pub mod ws;

pub use ble::BleConfig;
#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use ws::{WebSocketConfig, WebSocketTransport};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Receives every decoded inbound object, in arrival order.
pub type MessageSink = Arc<dyn Fn(JsonObject) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Ble => "ble",
            TransportKind::WebSocket => "websocket",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ble" => Ok(TransportKind::Ble),
            "websocket" => Ok(TransportKind::WebSocket),
            other => Err(Error::Config(format!("unsupported transport: {other}"))),
        }
    }

    pub fn default_poll_interval(&self) -> Duration {
        match self {
            TransportKind::Ble => DEFAULT_POLL_INTERVAL_BLE,
            TransportKind::WebSocket => DEFAULT_POLL_INTERVAL_WS,
        }
    }
}

/// Poll interval for a transport name as it appears in configuration.
pub fn default_poll_interval(transport: &str) -> Duration {
    TransportKind::parse(transport)
        .map(|kind| kind.default_poll_interval())
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Backoff,
    Stopped,
}

/// A device link: both transports expose the same lifecycle and command surface.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Spawn the reconnect loop. Calling it while the loop runs does nothing.
    async fn start(&self) -> Result<()>;

    /// Cancel the reconnect loop and release the connection. Safe to call twice.
    async fn stop(&self) -> Result<()>;

    async fn send_json(&self, payload: &JsonObject) -> Result<()>;

    /// Ask the device for a full status dump. No-op without a configured refresh message.
    async fn request_refresh(&self) -> Result<()>;

    fn link_state(&self) -> LinkState;

    fn watch_link(&self) -> watch::Receiver<LinkState>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport")]
pub enum TransportConfig {
    #[serde(rename = "ble")]
    Ble(BleConfig),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketConfig),
}

impl TransportConfig {
    /// Read a transport selection such as `{"transport": "websocket", "host": "..."}`.
    pub fn from_json(value: Value) -> Result<Self> {
        let kind = value
            .get("transport")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Config("transport not set".into()))?;
        TransportKind::parse(kind)?;
        serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Ble(_) => TransportKind::Ble,
            TransportConfig::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Ble(cfg) => cfg.validate(),
            TransportConfig::WebSocket(cfg) => cfg.validate(),
        }
    }
}

/// Accepts an object, a JSON string holding an object, or null.
pub(crate) fn deserialize_init_message<'de, D>(de: D) -> std::result::Result<Option<JsonObject>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::Object(map) => Some(map),
        Value::String(text) => parse_init_message(&text, "config"),
        _ => None,
    })
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reconnect delay: 1 s, doubling per failure, capped at 30 s.
#[derive(Debug)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: Duration::from_secs(1),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Duration::from_secs(1);
    }
}

/// One connection attempt and its read loop, driven by [`run_link`].
#[async_trait]
pub(crate) trait Session: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    fn status(&self) -> &watch::Sender<LinkState>;

    async fn connect(&self) -> Result<()>;

    /// Returns `Ok` when the session ends normally (peer closed, disconnect signal).
    async fn listen(&self, cancel: &CancellationToken) -> Result<()>;

    async fn disconnect(&self);

    fn set_state(&self, state: LinkState) {
        self.status().send_replace(state);
    }
}

pub(crate) async fn run_link<S: Session>(session: Arc<S>, cancel: CancellationToken) {
    let transport = session.kind().as_str();
    let mut backoff = Backoff::new();

    while !cancel.is_cancelled() {
        session.set_state(LinkState::Connecting);
        let attempt = async {
            session.connect().await?;
            session.set_state(LinkState::Connected);
            session.listen(&cancel).await
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = attempt => result,
        };

        match result {
            Ok(()) => {
                debug!(transport, "session ended, reconnecting");
                session.disconnect().await;
                backoff.reset();
            }
            Err(e) => {
                if e.is_link_error() {
                    debug!(transport, error = %e, "transport error");
                } else {
                    error!(transport, error = ?e, "unexpected transport error");
                }
                session.disconnect().await;
                session.set_state(LinkState::Backoff);
                let delay = backoff.next_delay();
                debug!(transport, delay_secs = delay.as_secs(), "backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    session.set_state(LinkState::Stopped);
}

/// Owns the background task of one transport.
#[derive(Default)]
pub(crate) struct Supervisor {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Supervisor {
    pub fn start<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = lock(&self.running);
        if let Some((_, handle)) = running.as_ref()
            && !handle.is_finished()
        {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(token.clone()));
        *running = Some((token, handle));
        true
    }

    pub async fn stop(&self) -> bool {
        let Some((token, handle)) = lock(&self.running).take() else {
            return false;
        };
        token.cancel();
        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "transport task panicked"),
        }
        true
    }
}

/// At most one detached request task. `stop` must abort it so nothing reconnects afterwards.
#[derive(Default)]
pub(crate) struct TaskSlot {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    /// Returns `false` without spawning while the previous task is still running.
    pub fn spawn<Fut>(&self, fut: Fut) -> bool
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = lock(&self.task);
        if let Some(handle) = task.as_ref()
            && !handle.is_finished()
        {
            return false;
        }
        *task = Some(tokio::spawn(fut));
        true
    }

    pub async fn cancel(&self) {
        let Some(handle) = lock(&self.task).take() else {
            return;
        };
        handle.abort();
        if let Err(e) = handle.await
            && !e.is_cancelled()
        {
            error!(error = %e, "request task panicked");
        }
    }
}

pub(crate) fn log_payload(transport: &str, payload: &JsonObject) {
    if payload.len() > 10 {
        let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        debug!(transport, count = keys.len(), ?keys, "payload keys");
    } else {
        let shown = Value::Object(payload.clone());
        trace!(transport, payload = %shown, "payload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn transport_selection() {
        assert_eq!(TransportKind::parse("ble").unwrap(), TransportKind::Ble);
        assert!(matches!(TransportKind::parse("zigbee"), Err(Error::Config(_))));

        let cfg = TransportConfig::from_json(json!({
            "transport": "websocket",
            "host": "10.0.0.7",
            "port": 8081,
            "path": "ws"
        }))
        .unwrap();
        match cfg {
            TransportConfig::WebSocket(ws) => {
                assert_eq!(ws.host, "10.0.0.7");
                assert_eq!(ws.port, Some(8081));
                assert_eq!(ws.url(), "ws://10.0.0.7:8081/ws");
                assert!(ws.init_message.is_some());
            }
            other => panic!("expected websocket config, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_or_missing_transport_is_config_error() {
        assert!(matches!(
            TransportConfig::from_json(json!({"host": "x"})),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            TransportConfig::from_json(json!({"transport": "serial"})),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn init_message_forms() {
        let cfg = TransportConfig::from_json(json!({
            "transport": "ble",
            "address": "AA:BB:CC:DD:EE:FF",
            "init_message": "{\"Refresh\":1}"
        }))
        .unwrap();
        let TransportConfig::Ble(ble) = cfg else {
            panic!("expected ble config");
        };
        assert_eq!(ble.init_message.unwrap()["Refresh"], 1);

        let cfg = TransportConfig::from_json(json!({
            "transport": "ble",
            "address": "AA:BB:CC:DD:EE:FF",
            "init_message": null
        }))
        .unwrap();
        let TransportConfig::Ble(ble) = cfg else {
            panic!("expected ble config");
        };
        assert!(ble.init_message.is_none());
    }

    #[tokio::test]
    async fn supervisor_start_is_idempotent_and_stop_cancels() {
        let supervisor = Supervisor::default();
        assert!(supervisor.start(|cancel| async move { cancel.cancelled().await }));
        assert!(!supervisor.start(|cancel| async move { cancel.cancelled().await }));
        assert!(supervisor.stop().await);
        assert!(!supervisor.stop().await);
        assert!(supervisor.start(|_| std::future::pending::<()>()));
        assert!(supervisor.stop().await);
    }

    #[test]
    fn payload_logging_formats_small_and_large_objects() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let small = json!({"Run": "heat"});
            log_payload("ble", small.as_object().unwrap());
            let large: JsonObject = (0..12).map(|i| (format!("K{i}"), json!(i))).collect();
            log_payload("websocket", &large);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_completes() {
        let slot = TaskSlot::default();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        assert!(slot.spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
        }));
        // a second request while the first is in flight is dropped
        assert!(!slot.spawn(async {}));

        slot.cancel().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!done.load(Ordering::SeqCst));

        assert!(slot.spawn(async {}));
        slot.cancel().await;
        slot.cancel().await;
    }
}
