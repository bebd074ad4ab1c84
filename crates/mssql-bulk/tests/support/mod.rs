//! Scripted TDS server for driving the bulk engine over an in-memory
//! duplex transport.

// Not every test file uses every helper.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tds_protocol::WriteBuffer;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// One scripted response to a completed client request.
#[derive(Debug, Clone)]
pub enum Response {
    /// Final DONE with a row count.
    Done {
        /// Reported row count.
        row_count: u64,
    },
    /// ERROR token followed by a final DONE with the error flag.
    ErrorThenDone {
        /// Server error number.
        number: i32,
        /// Server message text.
        message: String,
    },
}

/// A message the mock received, classified by packet type.
#[derive(Debug, Clone)]
pub struct Received {
    pub packet_type: u8,
    pub payload: Bytes,
}

impl Received {
    /// Decode a SQL batch payload back to its statement text.
    pub fn batch_sql(&self) -> String {
        // Skip the 22-byte ALL_HEADERS section.
        let text = &self.payload[22..];
        let units: Vec<u16> = text
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

/// Scripted server configuration.
#[derive(Debug)]
pub struct MockServer {
    /// Responses for SQL batch requests, in order.
    pub batch_responses: VecDeque<Response>,
    /// Response for the bulk data stream.
    pub bulk_response: Response,
    /// Acknowledge attention signals. When `false`, attentions are
    /// swallowed, forcing the client's cancel timeout.
    pub ack_attention: bool,
    /// Delay before acknowledging an attention.
    pub attention_delay: Duration,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            batch_responses: VecDeque::from([Response::Done { row_count: 0 }]),
            bulk_response: Response::Done { row_count: 0 },
            ack_attention: true,
            attention_delay: Duration::ZERO,
        }
    }
}

impl MockServer {
    pub fn with_bulk_response(mut self, response: Response) -> Self {
        self.bulk_response = response;
        self
    }

    pub fn with_batch_responses(mut self, responses: Vec<Response>) -> Self {
        self.batch_responses = responses.into();
        self
    }

    pub fn ignoring_attention(mut self) -> Self {
        self.ack_attention = false;
        self
    }

    /// Run the script against the server half of a duplex pipe,
    /// recording every complete message it receives.
    pub fn spawn(mut self, mut transport: DuplexStream) -> Arc<Mutex<Vec<Received>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        tokio::spawn(async move {
            let mut partial: Vec<u8> = Vec::new();
            let mut partial_type: Option<u8> = None;

            loop {
                let mut header = [0u8; 8];
                if transport.read_exact(&mut header).await.is_err() {
                    return;
                }
                let packet_type = header[0];
                let status = header[1];
                let length = u16::from_be_bytes([header[2], header[3]]) as usize;

                let mut payload = vec![0u8; length - 8];
                if transport.read_exact(&mut payload).await.is_err() {
                    return;
                }

                // Attention is out-of-band; it never carries a payload.
                if packet_type == 0x06 {
                    partial.clear();
                    partial_type = None;
                    if self.ack_attention {
                        tokio::time::sleep(self.attention_delay).await;
                        let ack = done_tokens(0x0020, 0);
                        if write_response(&mut transport, &ack).await.is_err() {
                            return;
                        }
                    }
                    continue;
                }

                partial_type.get_or_insert(packet_type);
                partial.extend_from_slice(&payload);

                if status & 0x01 == 0 {
                    continue;
                }

                let message = Received {
                    packet_type: partial_type.take().unwrap_or(packet_type),
                    payload: Bytes::from(std::mem::take(&mut partial)),
                };
                let is_batch = message.packet_type == 0x01;
                if let Ok(mut log) = log.lock() {
                    log.push(message);
                }

                let response = if is_batch {
                    self.batch_responses
                        .pop_front()
                        .unwrap_or(Response::Done { row_count: 0 })
                } else {
                    self.bulk_response.clone()
                };
                let bytes = encode_response(&response);
                if write_response(&mut transport, &bytes).await.is_err() {
                    return;
                }
            }
        });

        received
    }
}

fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Done { row_count } => done_tokens(0x0010, *row_count),
        Response::ErrorThenDone { number, message } => {
            let mut body = WriteBuffer::new();
            body.put_i32(*number);
            body.put_u8(1); // state
            body.put_u8(16); // class
            body.put_us_varchar(message);
            body.put_b_varchar("mock");
            body.put_b_varchar("");
            body.put_i32(1);
            let body = body.take();

            let mut buf = WriteBuffer::new();
            buf.put_u8(0xAA); // ERROR
            buf.put_u16(body.len() as u16);
            buf.put_slice(&body);
            // Final DONE with the error flag
            buf.put_u8(0xFD);
            buf.put_u16(0x0002);
            buf.put_u16(0);
            buf.put_u64(0);
            buf.take().to_vec()
        }
    }
}

fn done_tokens(status: u16, row_count: u64) -> Vec<u8> {
    let mut buf = WriteBuffer::new();
    buf.put_u8(0xFD);
    buf.put_u16(status);
    buf.put_u16(0);
    buf.put_u64(row_count);
    buf.take().to_vec()
}

async fn write_response(
    transport: &mut DuplexStream,
    tokens: &[u8],
) -> std::io::Result<()> {
    let mut packet = Vec::with_capacity(8 + tokens.len());
    packet.push(0x04); // TabularResult
    packet.push(0x01); // END_OF_MESSAGE
    packet.extend_from_slice(&((8 + tokens.len()) as u16).to_be_bytes());
    packet.extend_from_slice(&[0, 0]); // spid
    packet.push(1); // packet id
    packet.push(0); // window
    packet.extend_from_slice(tokens);

    transport.write_all(&packet).await?;
    transport.flush().await
}
