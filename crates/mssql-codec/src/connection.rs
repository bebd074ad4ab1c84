//! Split I/O connection for cancellation safety.
//!
//! The transport is split into read and write halves so an Attention packet
//! can be sent while the driver is blocked reading a response. Outbound
//! messages can be written whole or streamed chunk-by-chunk (the bulk-load
//! path), with one flush per packet so the transport's write readiness is
//! the backpressure signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{Packet, TdsCodec};

/// A TDS connection with split I/O.
///
/// # Cancellation
///
/// SQL Server cancels a running request via an out-of-band Attention
/// packet. The write half lives behind a mutex so a [`CancelHandle`] on
/// another task can send Attention while this task is blocked in
/// [`Connection::read_message`].
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    assembler: MessageAssembler,
    /// Negotiated packet size for outbound fragmentation.
    packet_size: usize,
    cancel_notify: Arc<Notify>,
    cancelling: Arc<AtomicBool>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport, using the default packet
    /// size.
    pub fn new(transport: T) -> Self {
        Self::with_packet_size(transport, tds_protocol::packet::DEFAULT_PACKET_SIZE)
    }

    /// Create a new connection with a negotiated packet size.
    pub fn with_packet_size(transport: T, packet_size: usize) -> Self {
        let packet_size = packet_size.min(tds_protocol::packet::MAX_PACKET_SIZE);
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::with_codec(
                read_half,
                TdsCodec::new().with_max_packet_size(packet_size),
            ),
            writer: Arc::new(Mutex::new(PacketWriter::with_codec(
                write_half,
                TdsCodec::new().with_max_packet_size(packet_size),
            ))),
            assembler: MessageAssembler::new(),
            packet_size,
            cancel_notify: Arc::new(Notify::new()),
            cancelling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// The largest payload one packet can carry.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.packet_size - PACKET_HEADER_SIZE
    }

    /// Get a handle for cancelling the in-flight request.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.cancel_notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    /// Clear the cancellation flag once the attention ack has been seen.
    pub fn finish_cancel(&self) {
        self.cancelling.store(false, Ordering::Release);
        self.cancel_notify.notify_waiters();
    }

    /// Read the next complete message, reassembling multi-packet messages
    /// and honoring the `IGNORE` status bit.
    ///
    /// Returns `Ok(None)` when the transport closes between messages.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if self.assembler.has_partial() {
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Send a complete message, fragmenting into packets of the negotiated
    /// size with `END_OF_MESSAGE` on the final packet.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<(), CodecError> {
        let max_payload = self.max_payload();
        let chunks: Vec<_> = if payload.is_empty() {
            vec![&payload[..]]
        } else {
            payload.chunks(max_payload).collect()
        };
        let total = chunks.len();

        let mut writer = self.writer.lock().await;
        writer.codec_mut().reset_packet_id();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let status = if i + 1 == total {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            writer.send(Packet::new(header, BytesMut::from(chunk))).await?;
        }

        Ok(())
    }

    /// Stream part of a message: drain every full packet's worth of bytes
    /// from `buf` and send them without `END_OF_MESSAGE`.
    ///
    /// At most one packet of encoded data remains buffered in `buf` when
    /// this returns, which bounds how far a producer can run ahead of the
    /// transport.
    pub async fn send_partial(
        &mut self,
        packet_type: PacketType,
        buf: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let max_payload = self.max_payload();
        if buf.len() < max_payload {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        while buf.len() >= max_payload {
            let chunk = buf.split_to(max_payload);
            let header = PacketHeader::new(packet_type, PacketStatus::NORMAL, 0);
            writer.send(Packet::new(header, chunk)).await?;
        }
        Ok(())
    }

    /// Finish a streamed message: send any buffered remainder and mark the
    /// final packet with `END_OF_MESSAGE`.
    pub async fn finish_message(
        &mut self,
        packet_type: PacketType,
        buf: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let max_payload = self.max_payload();
        let mut writer = self.writer.lock().await;

        loop {
            let remaining = buf.len();
            let take = remaining.min(max_payload);
            let chunk = buf.split_to(take);
            let status = if buf.is_empty() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            writer.send(Packet::new(header, chunk)).await?;
            if status.contains(PacketStatus::END_OF_MESSAGE) {
                return Ok(());
            }
        }
    }

    /// Begin a new outbound message exchange, restarting the packet
    /// sequence counter.
    pub async fn reset_packet_sequence(&mut self) {
        self.writer.lock().await.codec_mut().reset_packet_id();
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("cancelling", &self.is_cancelling())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// Handle for cancelling the in-flight request on a connection.
///
/// Cloneable; can be sent to another task.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    notify: Arc<Notify>,
    cancelling: Arc<AtomicBool>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send an Attention packet to cancel the current request.
    ///
    /// Idempotent: repeated calls while a cancellation is pending send
    /// nothing further.
    pub async fn cancel(&self) -> Result<(), CodecError> {
        if self.cancelling.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::debug!("sending Attention packet for request cancellation");

        let mut writer = self.writer.lock().await;
        let header = PacketHeader::new(
            PacketType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );
        writer.send(Packet::new(header, BytesMut::new())).await?;
        writer.flush().await?;

        Ok(())
    }

    /// Wait for the cancellation to complete (attention acknowledged).
    pub async fn wait_cancelled(&self) {
        if self.cancelling.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.cancelling.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
