//! Protocol error definitions.

use thiserror::Error;

/// Errors produced while encoding or decoding TDS wire data.
///
/// All variants are fatal at the connection level: a malformed frame or an
/// unknown tag means the byte stream can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Packet type byte is not a known TDS packet type.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status byte contains undefined bits.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Packet header declares a length smaller than the header itself.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(u16),

    /// Fewer bytes available than a fixed-size structure requires.
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Token tag byte is not a known TDS token.
    #[error("unknown token: 0x{0:02X}")]
    UnknownToken(u8),

    /// Data type byte in column metadata is not a known TDS type.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownType(u8),

    /// The byte stream ended in the middle of a variable-length structure.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A row token arrived before any column metadata.
    #[error("token 0x{0:02X} requires column metadata")]
    MissingMetadata(u8),

    /// A UCS-2 string on the wire was not valid UTF-16.
    #[error("invalid string encoding: {0}")]
    StringEncoding(String),

    /// A length field exceeds what the enclosing structure allows.
    #[error("length overflow: {0}")]
    LengthOverflow(u32),
}
