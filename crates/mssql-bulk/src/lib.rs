//! # mssql-bulk
//!
//! Streaming bulk-load client for SQL Server over the TDS protocol.
//!
//! The crate drives the TDS Bulk Load operation (packet type 0x07) over a
//! caller-supplied authenticated transport: configure a [`BulkLoad`] with
//! typed columns, hand [`BulkLoad::execute`] a row source, and receive the
//! server-reported row count exactly once.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_bulk::{
//!     BulkConnection, BulkLoad, BulkLoadOptions, ColumnOptions, Config, DataType, SqlValue, rows,
//! };
//!
//! let mut conn = BulkConnection::new(authenticated_stream, Config::default());
//!
//! let mut bulk = BulkLoad::new("dbo.events", BulkLoadOptions::default())?;
//! bulk.add_column("id", DataType::Int, ColumnOptions::default().nullable(false))?;
//! bulk.add_column("name", DataType::NVarChar, ColumnOptions::default().length(200))?;
//!
//! let handle = bulk.handle(); // cancel from any task
//! let row_count = bulk
//!     .execute(&mut conn, rows(vec![
//!         vec![SqlValue::Int(1), SqlValue::from("first")],
//!         vec![SqlValue::Int(2), SqlValue::from("second")],
//!     ]))
//!     .await?;
//! ```
//!
//! ## Cancellation and timeouts
//!
//! [`BulkLoadHandle::cancel`] is cooperative and idempotent: the engine
//! checks it between rows and between response tokens, sends the TDS
//! Attention signal, drains to the server's acknowledgment, and completes
//! with `Canceled.`. [`BulkLoad::set_timeout`] arms a one-shot timer that
//! follows the same path with a timeout error; firing after completion is
//! a no-op.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod config;
pub mod error;
pub mod request;
pub mod row_source;

pub use bulk::{BulkColumn, BulkLoad, BulkLoadHandle, BulkLoadOptions, BulkLoadPhase, ColumnOptions};
pub use config::Config;
pub use error::{BoxError, Error, Result};
pub use request::{BulkConnection, ConnectionState};
pub use row_source::{BulkRow, IterSource, RowSource, StreamSource, TryIterSource, rows, stream_rows, try_rows};

// Re-export the pieces callers need to build rows and columns.
pub use mssql_types::{ColumnSpec, DataType, EncodeOptions, SqlValue, TypeError};
pub use tds_protocol::version::TdsVersion;
