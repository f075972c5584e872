//! Error types surfaced by the messenger and its collaborators.

use control_wire::{CodecError, StatusCode};
use thiserror::Error;

/// Errors returned to callers of the control messenger
#[derive(Error, Debug)]
pub enum ControlError {
    /// The transport could not connect or send
    #[error("transport error: {0}")]
    Transport(String),

    /// A packet could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A response body did not match the expected type
    #[error("failed to deserialize {path} response: {source}")]
    Deserialize {
        /// Address path of the request
        path: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// A request body could not be serialized
    #[error("failed to serialize {path} request: {source}")]
    Serialize {
        /// Address path of the request
        path: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The server answered with a non-`Ok` status
    #[error("server returned {code:?} for {path}: {message}")]
    Server {
        /// Address path of the request
        path: String,
        /// Status reported by the server
        code: StatusCode,
        /// Error text reported by the server
        message: String,
    },

    /// The connection closed before the response arrived
    #[error("disconnected before a response was received")]
    Disconnected,

    /// No response arrived within the configured request timeout
    #[error("request {path} timed out")]
    Timeout {
        /// Address path of the request
        path: String,
    },

    /// The messenger has not been started
    #[error("messenger is not running")]
    NotRunning,

    /// I/O error from the underlying socket
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
