//! # mssql-codec
//!
//! Async framing layer for TDS packet handling.
//!
//! This crate transforms raw byte streams into TDS packets and messages,
//! and decodes the inbound token stream incrementally.
//!
//! ## Architecture
//!
//! ```text
//! transport → TdsCodec (packet framing) → MessageAssembler → TokenStreamDecoder → client
//! ```
//!
//! ### Cancellation Safety
//!
//! The connection splits the transport into read and write halves. This
//! allows sending Attention packets for request cancellation even while
//! blocked reading a large result set.
//!
//! ```rust,ignore
//! use mssql_codec::Connection;
//!
//! let conn = Connection::new(tcp_stream);
//! let cancel = conn.cancel_handle();
//!
//! // Cancel from another task
//! tokio::spawn(async move {
//!     cancel.cancel().await?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;
pub mod token_stream;

pub use connection::{CancelHandle, Connection};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
pub use token_stream::TokenStreamDecoder;
