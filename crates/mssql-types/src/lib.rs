//! # mssql-types
//!
//! SQL Server data type registry and value encoding.
//!
//! The registry ([`DataType`]) is process-wide and immutable: one entry per
//! writable SQL type, addressable by wire id and by name. Each entry knows
//! its DDL declaration, TYPE_INFO emission, length-prefix framing, value
//! encoding (a lazy chunk sequence, so `varchar(max)` values stream), and
//! validation.
//!
//! Validation is the bulk-load engine's first line of defense: a cell that
//! fails [`DataType::validate`] aborts the bulk load with a [`TypeError`]
//! while leaving the connection reusable.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod encode;
pub mod error;
pub mod registry;
pub mod value;

pub use error::TypeError;
pub use registry::{ALL_TYPES, ColumnSpec, DataType, EncodeOptions, ValueChunks};
pub use value::SqlValue;
