//! Error types for topology resolution and node polling.
//!
//! Only [`ProviderError`] is fatal to a run. Transport and poll errors are
//! per-node outcomes and never leave the polling loop.

use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;

/// Topology provider failures. Aborts the run.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("topology provider unavailable: {0}")]
    Unavailable(String),

    #[error("topology query `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("malformed topology document: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// CoAP exchange failures for a single request.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid CoAP URI `{0}`")]
    InvalidUri(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no response after {attempts} transmissions")]
    Timeout { attempts: u32 },

    #[error("request reset by peer")]
    Reset,
}

/// Outcome of a failed poll. Recovered by the caller loop.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("payload is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),

    #[error("poll timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
