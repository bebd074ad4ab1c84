//! Codec error types.

use thiserror::Error;

/// Errors that can occur in the framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying transport failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire data violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// Packet header declared a length smaller than the header itself.
    #[error("invalid packet header")]
    InvalidHeader,

    /// Packet exceeds the negotiated maximum size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared packet size.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// Transport closed mid-message.
    #[error("connection closed")]
    ConnectionClosed,
}
