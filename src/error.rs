use std::fmt;

use tokio_tungstenite::tungstenite;

#[derive(Debug)]
pub enum Error {
    #[cfg(feature = "ble")]
    Ble(btleplug::Error),
    WebSocket(tungstenite::Error),
    Json(serde_json::Error),
    NotConnected,
    DeviceNotFound(String),
    Config(String),
    Protocol(String),
    Timeout,
    Io(std::io::Error),
}

impl Error {
    /// Errors the reconnect loop expects to see during normal operation.
    /// Everything else is logged as unexpected before backing off.
    pub fn is_link_error(&self) -> bool {
        match self {
            #[cfg(feature = "ble")]
            Error::Ble(_) => true,
            Error::WebSocket(_)
            | Error::NotConnected
            | Error::DeviceNotFound(_)
            | Error::Timeout
            | Error::Io(_) => true,
            Error::Json(_) | Error::Config(_) | Error::Protocol(_) => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "ble")]
            Error::Ble(e) => write!(f, "BLE error: {e}"),
            Error::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::NotConnected => write!(f, "not connected"),
            Error::DeviceNotFound(addr) => write!(f, "device not found: {addr}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "ble")]
            Error::Ble(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "ble")]
impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        Error::Ble(e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
