//! Packet framing for the wire protocol.
//!
//! A packet is a length-prefixed unit made of the fixed header, a CBOR
//! metadata section, and an opaque body. The transport uses
//! [`FrameDecoder::next_packet`] to cut packets out of a byte stream; the
//! messenger parses each packet with [`Frame::decode`].

use crate::header::{PacketHeader, PACKET_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Maximum packet size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum packet size limit (64 MiB)
pub const HARD_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Maximum metadata size (64 KiB)
pub const MAX_META_SIZE: usize = 64 * 1024;

/// Complete wire packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fixed header
    pub header: PacketHeader,
    /// Metadata as raw CBOR bytes
    pub meta_raw: Bytes,
    /// Message body
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(header: PacketHeader, meta_raw: Bytes, body: Bytes) -> Self {
        Self {
            header,
            meta_raw,
            body,
        }
    }

    /// Get the total packet size when encoded, including the length prefix
    pub fn encoded_size(&self) -> usize {
        4 + PACKET_HEADER_SIZE + 4 + self.meta_raw.len() + self.body.len()
    }

    /// Encode the frame to a contiguous, length-prefixed buffer
    pub fn encode(&self, max_packet_size: usize) -> Result<Bytes, crate::WireError> {
        let total_size = self.encoded_size();
        if total_size > max_packet_size.min(HARD_MAX_PACKET_SIZE) {
            return Err(crate::WireError::Size(total_size));
        }
        if self.meta_raw.len() > MAX_META_SIZE {
            return Err(crate::WireError::Meta);
        }

        let mut buf = BytesMut::with_capacity(total_size);

        // Packet length (everything after this u32)
        buf.put_u32((total_size - 4) as u32);
        self.header.encode(&mut buf);
        buf.put_u32(self.meta_raw.len() as u32);
        buf.put_slice(&self.meta_raw);
        buf.put_slice(&self.body);

        Ok(buf.freeze())
    }

    /// Decode one complete, length-prefixed packet.
    ///
    /// The input is a whole packet, so a short one is malformed rather than
    /// incomplete.
    pub fn decode(mut packet: Bytes) -> Result<Self, crate::WireError> {
        if packet.len() < 4 {
            return Err(crate::WireError::Malformed);
        }

        let packet_len = packet.get_u32() as usize;
        if packet.len() != packet_len || packet_len < PACKET_HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }

        let header = PacketHeader::decode(&mut packet)?;

        if packet.len() < 4 {
            return Err(crate::WireError::Malformed);
        }
        let meta_len = packet.get_u32() as usize;
        if meta_len > MAX_META_SIZE || packet.len() < meta_len {
            return Err(crate::WireError::Meta);
        }

        let meta_raw = packet.split_to(meta_len);

        Ok(Self {
            header,
            meta_raw,
            body: packet,
        })
    }
}

/// Splits a byte stream into length-prefixed packets
#[derive(Debug)]
pub struct FrameDecoder {
    max_packet_size: usize,
}

impl FrameDecoder {
    /// Create a new decoder with the default size limit
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Create a decoder with a custom size limit, clamped to the hard maximum
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(HARD_MAX_PACKET_SIZE),
        }
    }

    /// Take the next complete packet (length prefix included) off the buffer.
    ///
    /// Returns `Ok(None)` until enough bytes have been buffered.
    pub fn next_packet(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, crate::WireError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let packet_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if packet_len + 4 > self.max_packet_size {
            return Err(crate::WireError::Size(packet_len));
        }

        if buf.len() < 4 + packet_len {
            trace!("Partial packet: have {} of {} bytes", buf.len(), 4 + packet_len);
            return Ok(None);
        }

        Ok(Some(buf.split_to(4 + packet_len).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MessageType;

    fn sample_frame() -> Frame {
        Frame::new(
            PacketHeader::new(MessageType::Request, 7),
            Bytes::from_static(&[0xA0]), // empty CBOR map
            Bytes::from_static(b"{}"),
        )
    }

    #[test]
    fn test_decoder_waits_for_complete_packet() {
        let encoded = sample_frame().encode(DEFAULT_MAX_PACKET_SIZE).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(decoder.next_packet(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        let packet = decoder.next_packet(&mut buf).unwrap().unwrap();
        assert_eq!(packet, encoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_splits_back_to_back_packets() {
        let first = sample_frame().encode(DEFAULT_MAX_PACKET_SIZE).unwrap();
        let mut second_frame = sample_frame();
        second_frame.header.transaction_id = 8;
        let second = second_frame.encode(DEFAULT_MAX_PACKET_SIZE).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        let a = Frame::decode(decoder.next_packet(&mut buf).unwrap().unwrap()).unwrap();
        let b = Frame::decode(decoder.next_packet(&mut buf).unwrap().unwrap()).unwrap();
        assert_eq!(a.header.transaction_id, 7);
        assert_eq!(b.header.transaction_id, 8);
        assert_eq!(b.body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_decoder_enforces_size_limit() {
        let mut decoder = FrameDecoder::with_max_packet_size(32);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        assert!(matches!(
            decoder.next_packet(&mut buf),
            Err(crate::WireError::Size(1024))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let frame = sample_frame();
        assert!(frame.encode(8).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_meta() {
        let encoded = sample_frame().encode(DEFAULT_MAX_PACKET_SIZE).unwrap();
        let mut raw = BytesMut::from(&encoded[..]);
        // Claim a metadata section longer than the packet
        let meta_len_offset = 4 + PACKET_HEADER_SIZE;
        raw[meta_len_offset..meta_len_offset + 4].copy_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(
            Frame::decode(raw.freeze()),
            Err(crate::WireError::Meta)
        ));
    }

    #[test]
    fn test_decode_short_packets_are_malformed() {
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[0, 0])),
            Err(crate::WireError::Malformed)
        ));

        // Consistent length prefix, but too short to hold a header
        let mut raw = BytesMut::new();
        raw.put_u32(3);
        raw.put_slice(&[1, 0, 0]);
        assert!(matches!(
            Frame::decode(raw.freeze()),
            Err(crate::WireError::Malformed)
        ));
    }
}
