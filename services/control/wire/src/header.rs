//! Fixed packet header for the control protocol.
//!
//! The 16-byte header carries everything the messenger needs for
//! correlation (message type, status, transaction id) so a packet can be
//! classified before its metadata or body are parsed.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Packet header size in bytes
pub const PACKET_HEADER_SIZE: usize = 16;

/// Message types carried by the control protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Client-to-server request awaiting a response
    Request = 0x00,
    /// Server reply correlated to a request by transaction id
    Response = 0x01,
    /// Unsolicited server push routed by address path
    Update = 0x02,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::Request),
            0x01 => Ok(MessageType::Response),
            0x02 => Ok(MessageType::Update),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Packet flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Meta has "hdr_csum" u32; readers validate it
        const HDR_CHECKSUM = 1 << 0;
    }
}

/// Outcome reported by the server on a response
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// The server rejected or failed the request
    Error = 1,
    /// The server does not implement the address path
    Unsupported = 2,
}

impl TryFrom<u8> for StatusCode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::Error),
            2 => Ok(StatusCode::Unsupported),
            _ => Err(crate::WireError::Code(value)),
        }
    }
}

/// Packet header (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Protocol version (must be 1)
    pub ver: u8,
    /// Message type
    pub typ: MessageType,
    /// Packet flags
    pub flags: Flags,
    /// Status code, meaningful on responses
    pub code: StatusCode,
    /// Request/response correlator, zero on updates
    pub transaction_id: u32,
    /// Sender wall clock in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl PacketHeader {
    /// Create a new header with default values
    pub fn new(typ: MessageType, transaction_id: u32) -> Self {
        Self {
            ver: WIRE_VERSION,
            typ,
            flags: Flags::empty(),
            code: StatusCode::Ok,
            transaction_id,
            timestamp_ms: 0,
        }
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ver);
        buf.put_u8(self.typ as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.code as u8);
        buf.put_u32(self.transaction_id);
        buf.put_u64(self.timestamp_ms);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(crate::WireError::Version(ver));
        }

        let typ = MessageType::try_from(buf.get_u8())?;
        let flags = Flags::from_bits(buf.get_u8()).ok_or(crate::WireError::Reserved)?;
        let code = StatusCode::try_from(buf.get_u8())?;
        let transaction_id = buf.get_u32();
        let timestamp_ms = buf.get_u64();

        Ok(Self {
            ver,
            typ,
            flags,
            code,
            transaction_id,
            timestamp_ms,
        })
    }
}

/// Calculate the CRC32 checksum of an encoded header
pub fn crc32_packet_header(header: &PacketHeader) -> u32 {
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
    header.encode(&mut buf);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::try_from(0x00).unwrap(), MessageType::Request);
        assert_eq!(MessageType::try_from(0x02).unwrap(), MessageType::Update);
        assert!(matches!(
            MessageType::try_from(0x7F),
            Err(crate::WireError::Type(0x7F))
        ));
    }

    #[test]
    fn test_header_encode_decode() {
        let mut header = PacketHeader::new(MessageType::Response, 0xDEAD_BEEF);
        header.code = StatusCode::Error;
        header.flags = Flags::HDR_CHECKSUM;
        header.timestamp_ms = 1_700_000_000_123;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let mut bytes = buf.freeze();
        let decoded = PacketHeader::decode(&mut bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_rejects_bad_version_and_flags() {
        let header = PacketHeader::new(MessageType::Request, 1);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let mut bad_version = buf.clone();
        bad_version[0] = 2;
        assert!(matches!(
            PacketHeader::decode(&mut bad_version.freeze()),
            Err(crate::WireError::Version(2))
        ));

        let mut bad_flags = buf.clone();
        bad_flags[2] = 0x80;
        assert!(matches!(
            PacketHeader::decode(&mut bad_flags.freeze()),
            Err(crate::WireError::Reserved)
        ));
    }

    #[test]
    fn test_checksum_changes_with_transaction_id() {
        let a = PacketHeader::new(MessageType::Request, 1);
        let b = PacketHeader::new(MessageType::Request, 2);
        assert_ne!(crc32_packet_header(&a), crc32_packet_header(&b));
    }
}
