//! # Hub Errors
//!
//! Three families, matching how each is handled:
//!
//! - [`ConfigError`]: fatal at boot, the binary exits.
//! - [`LinkError`]: transport failures, always answered by a reconnect cycle.
//! - [`DispatchError`]: downlink routing failures, logged and dropped by the receiver.

use beehive::BusError;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while loading or validating the hub configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required config key: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid cloud hub url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{key} file does not exist: {path}")]
    MissingTlsFile { key: &'static str, path: PathBuf },
}

/// Errors raised by a cloud link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to load TLS material: {0}")]
    Tls(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
    #[error("read deadline of {0:?} exceeded")]
    ReadTimeout(Duration),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("link is not connected")]
    NotConnected,
    #[error("link closed by peer")]
    Closed,
    #[error("max retry count reached when connecting to cloud")]
    MaxRetryExceeded,
}

/// Errors raised while routing a downlink message to local modules.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler for group {group:?}")]
    NoHandler { group: String },
    #[error("bus delivery failed: {0}")]
    Bus(#[from] BusError),
    #[error("sync waiter for {0} is not ready")]
    KeeperFull(String),
}
