use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::health::TransportHealth;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::stream::JsonObject;
use crate::transport::{
    BleConfig, LinkState, MessageSink, Transport, TransportConfig, TransportKind,
    WebSocketConfig, WebSocketTransport, lock,
};
use crate::types::HeaterState;
use crate::{Error, Result};

type MessageCallback = Box<dyn Fn(&JsonObject) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&HeaterState) + Send + Sync>;

pub struct HeaterClientBuilder {
    transport: Option<TransportConfig>,
    message_callbacks: Vec<MessageCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl Default for HeaterClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaterClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            message_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn transport(mut self, config: TransportConfig) -> Self {
        self.transport = Some(config);
        self
    }

    pub fn websocket(self, config: WebSocketConfig) -> Self {
        self.transport(TransportConfig::WebSocket(config))
    }

    pub fn ble(self, config: BleConfig) -> Self {
        self.transport(TransportConfig::Ble(config))
    }

    /// Called with every raw inbound object, before it is merged.
    pub fn on_message(mut self, f: impl Fn(&JsonObject) + Send + Sync + 'static) -> Self {
        self.message_callbacks.push(Box::new(f));
        self
    }

    /// Called with the merged state after every inbound object.
    pub fn on_snapshot(mut self, f: impl Fn(&HeaterState) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<HeaterClient> {
        let config = self
            .transport
            .ok_or_else(|| Error::Config("no transport selected".into()))?;
        config.validate()?;
        let kind = config.kind();

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let (state, _) = watch::channel(Arc::new(HeaterState::new()));
        let hub = Arc::new(MessageHub {
            kind,
            state,
            health: Mutex::new(TransportHealth::new()),
            logger: Mutex::new(logger),
            message_callbacks: self.message_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        });

        let sink: MessageSink = {
            let hub = hub.clone();
            Arc::new(move |payload| hub.handle_message(payload))
        };
        let transport: Box<dyn Transport> = match config {
            TransportConfig::WebSocket(cfg) => Box::new(WebSocketTransport::new(cfg, sink)),
            TransportConfig::Ble(cfg) => ble_transport(cfg, sink)?,
        };

        Ok(HeaterClient { transport, hub })
    }
}

#[cfg(feature = "ble")]
fn ble_transport(config: BleConfig, sink: MessageSink) -> Result<Box<dyn Transport>> {
    Ok(Box::new(crate::transport::BleTransport::new(config, sink)?))
}

#[cfg(not(feature = "ble"))]
fn ble_transport(_config: BleConfig, _sink: MessageSink) -> Result<Box<dyn Transport>> {
    Err(Error::Config(
        "BLE support not compiled in (enable the `ble` feature)".into(),
    ))
}

/// Everything inbound objects pass through, in order.
struct MessageHub {
    kind: TransportKind,
    state: watch::Sender<Arc<HeaterState>>,
    health: Mutex<TransportHealth>,
    logger: Mutex<Option<MessageLogger>>,
    message_callbacks: Vec<MessageCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl MessageHub {
    fn handle_message(&self, payload: JsonObject) {
        {
            let mut health = lock(&self.health);
            if let Some(latency_ms) = health.record_message() {
                debug!(
                    transport = self.kind.as_str(),
                    latency_ms,
                    avg_ms = health.avg_latency_ms().unwrap_or(latency_ms),
                    "refresh answered"
                );
            }
        }

        for cb in &self.message_callbacks {
            cb(&payload);
        }

        self.state
            .send_modify(|state| *state = Arc::new(state.merge(&payload)));
        let snapshot = self.state.borrow().clone();
        for cb in &self.snapshot_callbacks {
            cb(&snapshot);
        }

        if let Some(logger) = lock(&self.logger).as_mut() {
            logger.log_inbound(&payload);
        }
    }
}

/// Heater connection plus the merged device state.
pub struct HeaterClient {
    transport: Box<dyn Transport>,
    hub: Arc<MessageHub>,
}

impl HeaterClient {
    pub fn builder() -> HeaterClientBuilder {
        HeaterClientBuilder::new()
    }

    pub async fn start(&self) -> Result<()> {
        info!(transport = self.transport.kind().as_str(), "starting heater client");
        self.transport.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.transport.stop().await?;
        info!(transport = self.transport.kind().as_str(), "heater client stopped");
        Ok(())
    }

    pub async fn send(&self, payload: &JsonObject) -> Result<()> {
        let shown = Value::Object(payload.clone());
        debug!(payload = %shown, "sending command");
        if let Some(logger) = lock(&self.hub.logger).as_mut() {
            logger.log_command(self.transport.kind().as_str(), payload);
        }
        self.transport.send_json(payload).await
    }

    /// Starts a latency measurement; the next inbound object completes it.
    pub async fn request_refresh(&self) -> Result<()> {
        lock(&self.hub.health).record_refresh();
        if let Some(logger) = lock(&self.hub.logger).as_mut() {
            logger.log_refresh(self.transport.kind().as_str());
        }
        debug!(transport = self.transport.kind().as_str(), "refresh requested");
        self.transport.request_refresh().await
    }

    pub fn state(&self) -> Arc<HeaterState> {
        self.hub.state.borrow().clone()
    }

    /// Changes on every inbound object.
    pub fn subscribe(&self) -> watch::Receiver<Arc<HeaterState>> {
        self.hub.state.subscribe()
    }

    pub fn health(&self) -> TransportHealth {
        lock(&self.hub.health).clone()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn link_state(&self) -> LinkState {
        self.transport.link_state()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.transport.watch_link()
    }
}
