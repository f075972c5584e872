//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Buffer ends before the packet header does
    #[error("incomplete packet")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Invalid CBOR metadata
    #[error("cbor meta invalid")]
    Meta,

    /// Header checksum mismatch
    #[error("hdr checksum mismatch")]
    HdrCsum,

    /// Unknown flag bits set
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown message type
    #[error("unknown type {0}")]
    Type(u8),

    /// Unknown status code
    #[error("unknown code {0}")]
    Code(u8),

    /// Malformed packet structure
    #[error("malformed packet")]
    Malformed,
}
