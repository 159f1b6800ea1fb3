use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{MessageSink, deserialize_init_message, lock, log_payload};
use crate::protocol::{
    CHAR_NOTIFY_UUID, DEFAULT_BLE_APPEND_NEWLINE, DEFAULT_BLE_COMMAND_TIMEOUT,
    DEFAULT_BLE_CONNECT_TIMEOUT, DEFAULT_BLE_WRITE_CHAR, DEFAULT_BLE_WRITE_WITH_RESPONSE,
    format_uuid, refresh_command,
};
use crate::stream::{JsonObject, JsonObjectStream};
use crate::{Error, Result};

#[cfg(feature = "ble")]
mod link;
#[cfg(feature = "ble")]
pub use link::BleTransport;

/// Quiet period after the last dump message before the dump is summarised.
const REFRESH_LOG_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Device address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Short (`FFE1`) or full UUID of the characteristic commands are written to.
    pub write_char: String,
    pub write_with_response: bool,
    /// Some firmware builds expect newline-terminated commands.
    pub append_newline: bool,
    #[serde(deserialize_with = "deserialize_init_message")]
    pub init_message: Option<JsonObject>,
    #[serde(skip)]
    pub connect_timeout: Duration,
    #[serde(skip)]
    pub command_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            write_char: DEFAULT_BLE_WRITE_CHAR.to_string(),
            write_with_response: DEFAULT_BLE_WRITE_WITH_RESPONSE,
            append_newline: DEFAULT_BLE_APPEND_NEWLINE,
            init_message: Some(refresh_command()),
            connect_timeout: DEFAULT_BLE_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_BLE_COMMAND_TIMEOUT,
        }
    }
}

impl BleConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Config("BLE address not set".into()));
        }
        self.write_uuid()?;
        Ok(())
    }

    pub fn write_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&format_uuid(self.write_char.trim()))
            .map_err(|e| Error::Config(format!("invalid write characteristic {}: {e}", self.write_char)))
    }

    pub fn notify_uuid(&self) -> Uuid {
        Uuid::parse_str(&format_uuid(CHAR_NOTIFY_UUID)).unwrap_or_default()
    }
}

/// Turns notification fragments into whole objects for the sink.
pub(crate) struct Notifications {
    stream: Mutex<JsonObjectStream>,
    sink: MessageSink,
    dump: RefreshDump,
}

impl Notifications {
    pub fn new(sink: MessageSink) -> Self {
        Self {
            stream: Mutex::new(JsonObjectStream::new()),
            sink,
            dump: RefreshDump::default(),
        }
    }

    /// Returns the number of objects delivered.
    pub fn handle(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let text = String::from_utf8_lossy(data);
        let decoded = lock(&self.stream).feed(&text);
        let count = decoded.len();
        for payload in decoded {
            log_payload("ble", &payload);
            self.dump.note_message();
            (self.sink)(payload);
        }
        count
    }

    pub fn refresh_sent(&self) {
        self.dump.begin();
    }

    /// Drop partial input and any pending dump summary.
    pub fn reset(&self) {
        lock(&self.stream).clear();
        self.dump.cancel();
    }
}

#[derive(Default)]
struct DumpState {
    pending: bool,
    received: usize,
    summary: Option<JoinHandle<()>>,
}

/// Counts the burst of messages that answers a refresh and logs the total once it goes quiet.
#[derive(Clone, Default)]
pub(crate) struct RefreshDump {
    state: Arc<Mutex<DumpState>>,
}

impl RefreshDump {
    pub fn begin(&self) {
        let mut state = lock(&self.state);
        state.pending = true;
        state.received = 0;
        self.schedule(&mut state);
    }

    pub fn note_message(&self) {
        let mut state = lock(&self.state);
        if !state.pending {
            return;
        }
        state.received += 1;
        self.schedule(&mut state);
    }

    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if let Some(task) = state.summary.take() {
            task.abort();
        }
        state.pending = false;
        state.received = 0;
    }

    pub fn pending(&self) -> bool {
        lock(&self.state).pending
    }

    pub fn received(&self) -> usize {
        lock(&self.state).received
    }

    fn schedule(&self, state: &mut DumpState) {
        if let Some(task) = state.summary.take() {
            task.abort();
        }
        let shared = self.state.clone();
        state.summary = Some(tokio::spawn(async move {
            tokio::time::sleep(REFRESH_LOG_DELAY).await;
            let mut state = lock(&shared);
            if state.pending {
                debug!(messages = state.received, "BLE refresh dump complete");
            }
            state.pending = false;
            state.summary = None;
        }));
    }
}
