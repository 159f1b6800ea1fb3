use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    LinkState, MessageSink, Session, Supervisor, Transport, TransportKind,
    deserialize_init_message, log_payload, run_link,
};
use crate::protocol::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_WS_COMMAND_TIMEOUT,
    DEFAULT_WS_CONNECT_TIMEOUT, DEFAULT_WS_PORT, build_ws_url, normalize_path, refresh_command,
};
use crate::stream::JsonObject;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub host: String,
    /// `None` leaves the port out of the URL.
    pub port: Option<u16>,
    pub path: Option<String>,
    /// Sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// Sent after every connect and on each refresh request.
    #[serde(deserialize_with = "deserialize_init_message")]
    pub init_message: Option<JsonObject>,
    #[serde(skip)]
    pub connect_timeout: Duration,
    #[serde(skip)]
    pub command_timeout: Duration,
    #[serde(skip)]
    pub heartbeat_interval: Duration,
    #[serde(skip)]
    pub heartbeat_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: Some(DEFAULT_WS_PORT),
            path: None,
            token: None,
            init_message: Some(refresh_command()),
            connect_timeout: DEFAULT_WS_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_WS_COMMAND_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl WebSocketConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn url(&self) -> String {
        build_ws_url(
            self.host.trim(),
            self.port,
            &normalize_path(self.path.as_deref()),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("WebSocket host not set".into()));
        }
        self.bearer()?;
        Ok(())
    }

    fn bearer(&self) -> Result<Option<HeaderValue>> {
        match self.token.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(token) => HeaderValue::from_str(&format!("Bearer {token}"))
                .map(Some)
                .map_err(|e| Error::Config(format!("invalid access token: {e}"))),
        }
    }
}

struct WsSession {
    config: WebSocketConfig,
    url: String,
    sink: MessageSink,
    /// Doubles as the send lock: one frame in flight at a time.
    writer: Mutex<Option<WsWriter>>,
    reader: Mutex<Option<WsReader>>,
    status: watch::Sender<LinkState>,
}

impl WsSession {
    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(payload)) => {
                log_payload("websocket", &payload);
                (self.sink)(payload);
            }
            Ok(_) => debug!("non-object JSON from WebSocket, dropping"),
            Err(e) => debug!(error = %e, "invalid JSON payload from WebSocket"),
        }
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;
        timeout(self.config.command_timeout, writer.send(Message::Text(text))).await??;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;
        timeout(
            self.config.heartbeat_timeout,
            writer.send(Message::Ping(Vec::new())),
        )
        .await??;
        Ok(())
    }
}

#[async_trait]
impl Session for WsSession {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn status(&self) -> &watch::Sender<LinkState> {
        &self.status
    }

    async fn connect(&self) -> Result<()> {
        if self.writer.lock().await.is_some() {
            return Ok(());
        }

        let mut request = self.url.as_str().into_client_request()?;
        if let Some(bearer) = self.config.bearer()? {
            request.headers_mut().insert(AUTHORIZATION, bearer);
        }

        debug!(url = %self.url, "connecting");
        let (stream, _) = timeout(self.config.connect_timeout, connect_async(request)).await??;
        let (mut write, read) = stream.split();

        if let Some(init) = &self.config.init_message {
            let text = serde_json::to_string(init)?;
            timeout(self.config.command_timeout, write.send(Message::Text(text))).await??;
            debug!("init message sent");
        }

        *self.reader.lock().await = Some(read);
        *self.writer.lock().await = Some(write);
        info!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    async fn listen(&self, cancel: &CancellationToken) -> Result<()> {
        let mut reader = self.reader.lock().await.take().ok_or(Error::NotConnected)?;
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            let pong_wait = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = heartbeat.tick() => {
                    if let Err(e) = self.ping().await {
                        warn!(error = %e, "heartbeat ping failed, closing connection");
                        return Err(e);
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.heartbeat_timeout);
                    }
                }
                _ = pong_wait => {
                    warn!("no pong within heartbeat timeout, closing connection");
                    return Err(Error::Timeout);
                }
                frame = reader.next() => match frame {
                    None => {
                        debug!("WebSocket stream ended");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Pong(_))) => pong_deadline = None,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "closed by device");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn disconnect(&self) {
        self.reader.lock().await.take();
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        match timeout(self.config.command_timeout, writer.close()).await {
            Ok(Ok(())) => debug!("WebSocket closed"),
            Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
            Err(_) => debug!("WebSocket close timed out"),
        }
    }
}

/// Connection to the heater's WebSocket endpoint (`ws://<host>:81/` on stock firmware).
pub struct WebSocketTransport {
    session: Arc<WsSession>,
    supervisor: Supervisor,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig, sink: MessageSink) -> Self {
        let url = config.url();
        let (status, _) = watch::channel(LinkState::Idle);
        Self {
            session: Arc::new(WsSession {
                config,
                url,
                sink,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                status,
            }),
            supervisor: Supervisor::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.session.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn start(&self) -> Result<()> {
        let session = self.session.clone();
        if self.supervisor.start(|cancel| run_link(session, cancel)) {
            debug!(url = %self.session.url, "WebSocket transport started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.supervisor.stop().await;
        self.session.disconnect().await;
        self.session.set_state(LinkState::Stopped);
        Ok(())
    }

    async fn send_json(&self, payload: &JsonObject) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        self.session.send_text(text).await
    }

    async fn request_refresh(&self) -> Result<()> {
        let Some(init) = &self.session.config.init_message else {
            debug!("no refresh message configured");
            return Ok(());
        };
        if self.session.writer.lock().await.is_none() {
            debug!("refresh skipped, not connected");
            return Ok(());
        }
        self.send_json(init).await
    }

    fn link_state(&self) -> LinkState {
        *self.session.status.borrow()
    }

    fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.session.status.subscribe()
    }
}
