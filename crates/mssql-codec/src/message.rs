//! TDS message reassembly.
//!
//! TDS messages can span multiple packets. This module reassembles packets
//! into complete messages based on the `END_OF_MESSAGE` status flag, and
//! implements the two status-bit behaviors the framer owns: `IGNORE`
//! discards the in-flight message, `RESET_CONNECTION` is surfaced as a flag
//! on the assembled message for the state machine to act on.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{PacketStatus, PacketType};

use crate::packet_codec::Packet;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// The packet type of this message.
    pub packet_type: PacketType,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
    /// `RESET_CONNECTION` was observed on a packet of this message.
    pub reset_connection: bool,
}

impl Message {
    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles multiple TDS packets into complete messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    /// Buffer for accumulating packet payloads.
    buffer: BytesMut,
    /// Packet type of the message being assembled.
    packet_type: Option<PacketType>,
    /// Number of packets accumulated.
    packet_count: usize,
    /// A packet carried the RESET_CONNECTION flag.
    reset_connection: bool,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet into the assembler.
    ///
    /// Returns `Some(Message)` if this packet completes a message, `None`
    /// if more packets are needed or the message was discarded via the
    /// `IGNORE` status bit.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);

        if packet.header.status.contains(PacketStatus::RESET_CONNECTION) {
            self.reset_connection = true;
        }

        // IGNORE is only meaningful on an EOM packet: sender aborts the
        // message it was in the middle of writing.
        if packet.header.is_ignore() && packet.header.is_end_of_message() {
            tracing::debug!(
                packets_discarded = self.packet_count + 1,
                "discarding in-flight message (IGNORE)"
            );
            self.clear();
            return None;
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.header.is_end_of_message(),
            "assembling message"
        );

        if packet.header.is_end_of_message() {
            let message = Message {
                packet_type,
                payload: self.buffer.split().freeze(),
                reset_connection: self.reset_connection,
            };
            self.packet_type = None;
            self.packet_count = 0;
            self.reset_connection = false;
            Some(message)
        } else {
            None
        }
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Get the number of packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Clear any partial message data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
        self.reset_connection = false;
    }
}
