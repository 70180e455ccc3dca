use std::time::Duration;

use thiserror::Error;

/// Transport-level failure talking to the player.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("player binary not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("control bus: {0}")]
    ControlBus(String),
    #[error("control bus call timed out after {0:?}")]
    Timeout(Duration),
    #[error("player returned HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected reply: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("injected {0} failure")]
    Injected(&'static str),
}

/// Error returned by the controller's public operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no file named {0:?} found")]
    NotFound(String),
    #[error("{0} is not available")]
    Unsupported(&'static str),
    #[error("remote control link: {0}")]
    Hardware(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
