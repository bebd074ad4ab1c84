//! # tds-protocol
//!
//! Pure implementation of the MS-TDS (Tabular Data Stream) wire protocol
//! pieces needed by a bulk-load client: packet framing structures, the
//! response token stream, column metadata, and collation decoding.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic
//! and makes no assumptions about the async runtime; decoders signal "need
//! more bytes" with `Ok(None)` so a caller can suspend on a partial read and
//! resume without re-parsing. Higher-level crates build the async framing on
//! this foundation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_protocol::{PacketHeader, PacketType, PacketStatus};
//!
//! let header = PacketHeader {
//!     packet_type: PacketType::BulkLoad,
//!     status: PacketStatus::END_OF_MESSAGE,
//!     length: 100,
//!     spid: 0,
//!     packet_id: 1,
//!     window: 0,
//! };
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod metadata;
pub mod packet;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use codec::WriteBuffer;
pub use collation::{Collation, CollationFlags};
pub use error::ProtocolError;
pub use metadata::{ColMetaData, ColumnMetadata, RawRow, UdtInfo, XmlSchema};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use token::{
    Done, DoneStatus, EnvChange, EnvChangeType, LoginAck, Order, ServerError, ServerInfo, Token,
    TokenType,
};
pub use types::{ColumnFlags, TypeId, TypeTail};
pub use version::TdsVersion;
