//! Encoding and decoding of control messages.
//!
//! Metadata travels as a canonical CBOR map; [`encode_message`] and
//! [`decode_message`] convert between [`ControlMessage`] and packets.

use crate::frame::Frame;
use crate::header::{crc32_packet_header, Flags, PacketHeader};
use crate::message::ControlMessage;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

const META_ADDRESS_PATH: &str = "address_path";
const META_SESSION_ID: &str = "session_id";
const META_ERROR: &str = "error";
const META_HDR_CSUM: &str = "hdr_csum";

/// CBOR metadata builder helper
#[derive(Debug, Clone)]
pub struct MetaBuilder {
    map: BTreeMap<String, ciborium::Value>,
}

impl MetaBuilder {
    /// Create a new metadata builder
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert a string value
    pub fn insert_str(mut self, key: &str, value: &str) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Text(value.to_string()));
        self
    }

    /// Insert a u32 value
    pub fn insert_u32(mut self, key: &str, value: u32) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Integer(value.into()));
        self
    }

    /// Build the metadata as CBOR bytes
    pub fn build(self) -> Result<Bytes, CodecError> {
        let value = ciborium::Value::Map(
            self.map
                .into_iter()
                .map(|(k, v)| (ciborium::Value::Text(k), v))
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| CodecError::MetaEncode)?;

        Ok(Bytes::from(buf))
    }
}

impl Default for MetaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] crate::WireError),
    /// Metadata encoding error
    #[error("metadata encoding failed")]
    MetaEncode,
    /// Metadata decoding error
    #[error("metadata decoding failed")]
    MetaDecode,
    /// A required metadata key was absent
    #[error("metadata key missing: {0}")]
    MissingMeta(&'static str),
}

/// Parse CBOR metadata into a map
pub fn parse_meta(meta_raw: &[u8]) -> Result<BTreeMap<String, ciborium::Value>, CodecError> {
    let value: ciborium::Value =
        ciborium::from_reader(meta_raw).map_err(|_| CodecError::MetaDecode)?;

    if let ciborium::Value::Map(map) = value {
        let mut result = BTreeMap::new();
        for (key, value) in map {
            if let ciborium::Value::Text(key_str) = key {
                result.insert(key_str, value);
            }
        }
        Ok(result)
    } else {
        Err(CodecError::MetaDecode)
    }
}

/// Get string value from metadata
pub fn get_meta_str(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Text(s) = v {
            Some(s.clone())
        } else {
            None
        }
    })
}

/// Get u32 value from metadata
pub fn get_meta_u32(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<u32> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Integer(i) = v {
            (*i).try_into().ok()
        } else {
            None
        }
    })
}

/// Serialize a message into a length-prefixed packet
pub fn encode_message(message: &ControlMessage, max_packet_size: usize) -> Result<Bytes, CodecError> {
    let mut header = PacketHeader::new(message.message_type, message.transaction_id);
    header.code = message.status;
    header.timestamp_ms = message.timestamp_ms;
    header.flags |= Flags::HDR_CHECKSUM;

    let mut meta = MetaBuilder::new()
        .insert_str(META_ADDRESS_PATH, &message.address_path)
        .insert_u32(META_HDR_CSUM, crc32_packet_header(&header));
    if let Some(ref session_id) = message.session_id {
        meta = meta.insert_str(META_SESSION_ID, session_id);
    }
    if let Some(ref error) = message.error {
        meta = meta.insert_str(META_ERROR, error);
    }

    let frame = Frame::new(header, meta.build()?, message.body.clone());
    frame.encode(max_packet_size).map_err(CodecError::Wire)
}

/// Parse a complete packet into a message
pub fn decode_message(packet: Bytes) -> Result<ControlMessage, CodecError> {
    let frame = Frame::decode(packet)?;
    let meta = parse_meta(&frame.meta_raw)?;

    if frame.header.flags.contains(Flags::HDR_CHECKSUM) {
        let expected = get_meta_u32(&meta, META_HDR_CSUM).ok_or(CodecError::MissingMeta(META_HDR_CSUM))?;
        if expected != crc32_packet_header(&frame.header) {
            return Err(CodecError::Wire(crate::WireError::HdrCsum));
        }
    }

    let address_path =
        get_meta_str(&meta, META_ADDRESS_PATH).ok_or(CodecError::MissingMeta(META_ADDRESS_PATH))?;

    Ok(ControlMessage {
        message_type: frame.header.typ,
        address_path,
        transaction_id: frame.header.transaction_id,
        session_id: get_meta_str(&meta, META_SESSION_ID),
        status: frame.header.code,
        error: get_meta_str(&meta, META_ERROR),
        timestamp_ms: frame.header.timestamp_ms,
        body: frame.body,
    })
}
