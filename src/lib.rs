mod client;
mod diff;
mod error;
mod health;
mod logger;
pub mod normalize;
pub mod protocol;
mod stream;
pub mod transport;
mod types;

pub use client::{HeaterClient, HeaterClientBuilder};
pub use error::{Error, Result};
pub use health::TransportHealth;
pub use logger::MessageLogMode;
pub use stream::{JsonObject, JsonObjectStream};
pub use transport::{
    BleConfig, LinkState, MessageSink, Transport, TransportConfig, TransportKind,
    WebSocketConfig, WebSocketTransport,
};
#[cfg(feature = "ble")]
pub use transport::BleTransport;
pub use types::*;
