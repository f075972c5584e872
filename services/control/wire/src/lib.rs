//! Packet framing, metadata, and typed messages for the control protocol.
//!
//! This crate provides the wire layer used by the control messenger: a
//! length-prefixed packet with a fixed header, CBOR metadata, and a JSON
//! body, plus the typed requests, responses, and updates exchanged with a
//! remote capture/control service.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------------------------+
//! | u32 packet_len       | length of bytes that follow                  |
//! +----------------------+----------------------------------------------+
//! | Packet Header (16B)  | ver | type | flags | status | txn id | ts(ms) |
//! +----------------------+----------------------------------------------+
//! | u32 meta_len         | canonical CBOR map length                    |
//! +----------------------+----------------------------------------------+
//! | meta_bytes           | address_path, session_id, error, hdr_csum    |
//! +----------------------+----------------------------------------------+
//! | body                 | JSON payload (0..N)                          |
//! +----------------------+----------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod control;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;

// Re-export main types
pub use codec::{
    decode_message, encode_message, get_meta_str, get_meta_u32, parse_meta, CodecError,
    MetaBuilder,
};
pub use control::{decode_body, paths, ControlRequest, ControlUpdate, UpdateParseError};
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_PACKET_SIZE, HARD_MAX_PACKET_SIZE, MAX_META_SIZE};
pub use header::{crc32_packet_header, Flags, MessageType, PacketHeader, StatusCode, PACKET_HEADER_SIZE, WIRE_VERSION};
pub use message::ControlMessage;
