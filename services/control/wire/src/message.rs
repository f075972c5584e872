//! Logical control message exchanged after packet decoding.

use crate::header::{MessageType, StatusCode};
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// A decoded control protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Request, response, or update
    pub message_type: MessageType,
    /// Hierarchical topic of the message, e.g. `/session/start`
    pub address_path: String,
    /// Correlator linking a response to its request; zero on updates
    pub transaction_id: u32,
    /// Session the message belongs to, if one is established
    pub session_id: Option<String>,
    /// Server-reported outcome (responses only)
    pub status: StatusCode,
    /// Server-reported error text accompanying a non-`Ok` status
    pub error: Option<String>,
    /// Sender wall clock in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// JSON payload, not interpreted by the wire layer
    pub body: Bytes,
}

impl ControlMessage {
    fn new(message_type: MessageType, address_path: &str, transaction_id: u32, body: Bytes) -> Self {
        Self {
            message_type,
            address_path: address_path.to_string(),
            transaction_id,
            session_id: None,
            status: StatusCode::Ok,
            error: None,
            timestamp_ms: now_millis(),
            body,
        }
    }

    /// Build an outgoing request
    pub fn request(address_path: &str, transaction_id: u32, body: Bytes) -> Self {
        Self::new(MessageType::Request, address_path, transaction_id, body)
    }

    /// Build a successful response
    pub fn response(address_path: &str, transaction_id: u32, body: Bytes) -> Self {
        Self::new(MessageType::Response, address_path, transaction_id, body)
    }

    /// Build a failed response carrying an error description
    pub fn error_response(
        address_path: &str,
        transaction_id: u32,
        status: StatusCode,
        error: &str,
    ) -> Self {
        let mut message = Self::new(MessageType::Response, address_path, transaction_id, Bytes::new());
        message.status = status;
        message.error = Some(error.to_string());
        message
    }

    /// Build an unsolicited update
    pub fn update(address_path: &str, body: Bytes) -> Self {
        Self::new(MessageType::Update, address_path, 0, body)
    }

    /// Attach a session id
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
