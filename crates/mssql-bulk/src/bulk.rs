//! Streaming bulk-load engine.
//!
//! A bulk load is configured column by column, then executed against a
//! [`BulkConnection`] with a caller-supplied row source. Execution sends
//! the `insert bulk` prelude as a SQL batch, streams a COLMETADATA header
//! and one ROW token per source row over the bulk-load packet type, and
//! reconciles the server's DONE/ERROR stream into a single completion.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mssql_bulk::{BulkLoad, BulkLoadOptions, ColumnOptions, DataType, rows};
//!
//! let mut bulk = BulkLoad::new("dbo.events", BulkLoadOptions::default())?;
//! bulk.add_column("id", DataType::Int, ColumnOptions::default())?;
//! bulk.add_column("name", DataType::NVarChar, ColumnOptions::default().length(200))?;
//!
//! let row_count = bulk
//!     .execute(&mut conn, rows(vec![
//!         vec![SqlValue::Int(1), SqlValue::from("ok")],
//!     ]))
//!     .await?;
//! ```
//!
//! Cancellation, timeout, row-source failure, and cell validation failure
//! all follow the same abort path: stop pulling rows, signal attention,
//! drain until the server acknowledges, and complete exactly once with
//! the pertinent error while the connection returns to `LoggedIn`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mssql_types::{ColumnSpec, DataType, EncodeOptions};
use tds_protocol::WriteBuffer;
use tds_protocol::token::{ServerError, Token, TokenType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::request::BulkConnection;
use crate::row_source::{BulkRow, RowSource};

/// Options controlling bulk insert behavior.
#[derive(Debug, Clone, Default)]
pub struct BulkLoadOptions {
    /// Honor check constraints during the load.
    pub check_constraints: bool,
    /// Fire INSERT triggers on the target table.
    pub fire_triggers: bool,
    /// Keep NULL cells instead of applying column defaults.
    pub keep_nulls: bool,
    /// Declare the stream pre-sorted: column name to `"ASC"` or `"DESC"`,
    /// in hint order.
    pub order: Vec<(String, String)>,
}

/// Per-column configuration for [`BulkLoad::add_column`].
#[derive(Debug, Clone, Default)]
pub struct ColumnOptions {
    /// Column accepts NULL. Defaults to `true`.
    pub nullable: Option<bool>,
    /// Declared length for variable types.
    pub length: Option<u32>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and scaled time types.
    pub scale: Option<u8>,
    /// Name used on the wire and in generated SQL, when it differs from
    /// the row-projection name.
    pub obj_name: Option<String>,
}

impl ColumnOptions {
    /// Set nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Set the declared length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set precision.
    #[must_use]
    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set scale.
    #[must_use]
    pub fn scale(mut self, scale: u8) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the wire/SQL name.
    #[must_use]
    pub fn obj_name(mut self, name: impl Into<String>) -> Self {
        self.obj_name = Some(name.into());
        self
    }
}

/// One configured bulk-load column.
#[derive(Debug, Clone)]
pub struct BulkColumn {
    /// Name rows are projected by.
    pub name: String,
    /// Name used on the wire and in generated SQL.
    pub obj_name: String,
    /// Registered data type.
    pub data_type: DataType,
    /// Type parameters.
    pub spec: ColumnSpec,
}

impl BulkColumn {
    fn declaration(&self) -> String {
        format!("[{}] {}", self.obj_name, self.data_type.declaration(&self.spec))
    }
}

/// Lifecycle phase of a bulk-load handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkLoadPhase {
    /// Accepting column configuration.
    Configuring,
    /// Execution in progress.
    Executing,
    /// Cancelled before completion.
    Cancelled,
    /// Completed successfully.
    Completed,
    /// Failed.
    Errored,
}

#[derive(Debug, Default)]
struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancellation handle for a bulk load.
///
/// Cloneable and sendable to other tasks. Cancelling is idempotent and a
/// no-op once the bulk load has completed.
#[derive(Debug, Clone)]
pub struct BulkLoadHandle {
    flag: Arc<CancelFlag>,
}

impl BulkLoadHandle {
    /// Request cancellation of the bulk load.
    pub fn cancel(&self) {
        self.flag.cancel();
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }
}

/// A configured bulk-load operation.
#[derive(Debug)]
pub struct BulkLoad {
    table: String,
    options: BulkLoadOptions,
    columns: Vec<BulkColumn>,
    phase: BulkLoadPhase,
    timeout: Option<Duration>,
    flag: Arc<CancelFlag>,
}

impl BulkLoad {
    /// Create a bulk load against `table`.
    ///
    /// Option validation is fail-fast: a malformed `order` entry is
    /// rejected here, before any I/O.
    pub fn new(table: impl Into<String>, options: BulkLoadOptions) -> Result<Self> {
        for (column, direction) in &options.order {
            if direction != "ASC" && direction != "DESC" {
                return Err(Error::InvalidOrderDirection(column.clone()));
            }
        }

        Ok(Self {
            table: table.into(),
            options,
            columns: Vec::new(),
            phase: BulkLoadPhase::Configuring,
            timeout: None,
            flag: Arc::new(CancelFlag::default()),
        })
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> BulkLoadPhase {
        self.phase
    }

    /// Configured columns.
    #[must_use]
    pub fn columns(&self) -> &[BulkColumn] {
        &self.columns
    }

    /// Get a cancellation handle.
    #[must_use]
    pub fn handle(&self) -> BulkLoadHandle {
        BulkLoadHandle {
            flag: Arc::clone(&self.flag),
        }
    }

    /// Arm a one-shot timeout for the whole execution. Firing after
    /// completion is a no-op.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Append a column. Valid only before execution starts.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
        options: ColumnOptions,
    ) -> Result<()> {
        if self.phase != BulkLoadPhase::Configuring {
            return Err(Error::ColumnsSealed);
        }

        let name = name.into();
        self.columns.push(BulkColumn {
            obj_name: options.obj_name.unwrap_or_else(|| name.clone()),
            name,
            data_type,
            spec: ColumnSpec {
                nullable: options.nullable.unwrap_or(true),
                length: options.length,
                precision: options.precision,
                scale: options.scale,
                collation: None,
            },
        });
        Ok(())
    }

    /// DDL creating a table shaped like the configured columns, for
    /// loading into `#temp` tables.
    #[must_use]
    pub fn table_creation_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let nullability = if c.spec.nullable { "NULL" } else { "NOT NULL" };
                format!("{} {}", c.declaration(), nullability)
            })
            .collect();
        format!("CREATE TABLE {} (\n{}\n)", self.table, columns.join(",\n"))
    }

    /// The `insert bulk` statement that precedes the data stream.
    fn bulk_insert_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(BulkColumn::declaration).collect();
        let mut sql = format!("insert bulk {} ({})", self.table, columns.join(", "));

        let mut with_options: Vec<String> = Vec::new();
        if self.options.check_constraints {
            with_options.push("CHECK_CONSTRAINTS".to_string());
        }
        if self.options.fire_triggers {
            with_options.push("FIRE_TRIGGERS".to_string());
        }
        if self.options.keep_nulls {
            with_options.push("KEEP_NULLS".to_string());
        }
        if !self.options.order.is_empty() {
            let keys: Vec<String> = self
                .options
                .order
                .iter()
                .map(|(column, direction)| format!("[{column}] {direction}"))
                .collect();
            with_options.push(format!("ORDER({})", keys.join(", ")));
        }

        if !with_options.is_empty() {
            sql.push_str(&format!(" with ({})", with_options.join(",")));
        }

        sql
    }

    /// Emit the COLMETADATA header describing the configured columns,
    /// mirroring the format the metadata decoder reads.
    fn write_colmetadata(&self, buf: &mut WriteBuffer) {
        buf.put_u8(TokenType::ColMetaData as u8);
        buf.put_u16(self.columns.len() as u16);

        for column in &self.columns {
            buf.put_u32(0); // userType
            let flags: u16 = if column.spec.nullable { 0x0001 } else { 0x0000 };
            buf.put_u16(flags);
            column.data_type.encode_type_info(&column.spec, buf);
            buf.put_b_varchar(&column.obj_name);
        }
    }

    /// Emit the trailing DONE token of the bulk data stream.
    fn write_done(&self, buf: &mut WriteBuffer, row_count: u64) {
        buf.put_u8(TokenType::Done as u8);
        buf.put_u16(0x0010); // DONE_COUNT
        buf.put_u16(0);
        buf.put_u64(row_count);
    }

    /// Execute the bulk load, pulling every row from `source`.
    ///
    /// Resolves exactly once: with the accepted row count on success, or
    /// with the first pertinent error (cancellation, timeout, validation,
    /// row-source failure, server error) after the request has been
    /// settled server-side.
    pub async fn execute<T, R>(&mut self, conn: &mut BulkConnection<T>, source: R) -> Result<u64>
    where
        T: AsyncRead + AsyncWrite + Unpin,
        R: RowSource,
    {
        if self.phase != BulkLoadPhase::Configuring {
            return Err(Error::BulkLoad(
                "bulk load handles are single-use; create a new one".to_string(),
            ));
        }
        if self.columns.is_empty() {
            self.phase = BulkLoadPhase::Errored;
            return Err(Error::BulkLoad("no columns configured".to_string()));
        }
        if self.flag.is_cancelled() {
            self.phase = BulkLoadPhase::Cancelled;
            return Err(Error::Canceled);
        }

        self.phase = BulkLoadPhase::Executing;
        let timeout_ms = self.timeout.map(|t| t.as_millis() as u64);
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let result = self.run(conn, source, deadline, timeout_ms).await;

        self.phase = match &result {
            Ok(_) => BulkLoadPhase::Completed,
            Err(Error::Canceled) => BulkLoadPhase::Cancelled,
            Err(_) => BulkLoadPhase::Errored,
        };
        result
    }

    async fn run<T, R>(
        &self,
        conn: &mut BulkConnection<T>,
        mut source: R,
        deadline: Option<Instant>,
        timeout_ms: Option<u64>,
    ) -> Result<u64>
    where
        T: AsyncRead + AsyncWrite + Unpin,
        R: RowSource,
    {
        let timeout_error = || Error::Timeout(timeout_ms.unwrap_or(0));

        // Phase 1: the `insert bulk` prelude as a regular SQL batch.
        let sql = self.bulk_insert_sql();
        conn.send_sql_batch(&sql).await?;

        let mut server_error: Option<ServerError> = None;
        loop {
            let step = interruptible(&self.flag, deadline, conn.next_token()).await;
            match step {
                Interrupted::Value(token) => match token? {
                    Token::Error(e) => {
                        server_error.get_or_insert(e);
                    }
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done)
                        if !done.status.more =>
                    {
                        conn.settle();
                        if let Some(e) = server_error {
                            return Err(Error::from_server_error(e));
                        }
                        break;
                    }
                    other => {
                        tracing::trace!(token = ?other, "prelude token");
                    }
                },
                Interrupted::Cancelled => {
                    return Err(self.abort(conn, Error::Canceled).await);
                }
                Interrupted::TimedOut => {
                    return Err(self.abort(conn, timeout_error()).await);
                }
            }
        }

        // Phase 2: the bulk data stream (COLMETADATA, rows, DONE) as one
        // logical message.
        conn.begin_bulk_stream().await?;

        let mut buf = WriteBuffer::with_capacity(conn.config().packet_size);
        self.write_colmetadata(&mut buf);

        let column_names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        let encode_options = EncodeOptions {
            use_utc: conn.config().use_utc,
        };

        let mut rows_sent = 0u64;
        loop {
            let step = interruptible(&self.flag, deadline, source.next_row()).await;
            match step {
                Interrupted::Value(None) => break,
                Interrupted::Value(Some(Ok(row))) => {
                    if let Err(e) = self.encode_row(row, &column_names, &encode_options, &mut buf) {
                        return Err(self.abort(conn, e).await);
                    }
                    rows_sent += 1;
                    // At most one packet's worth stays buffered ahead of
                    // the transport.
                    conn.write_bulk_chunk(buf.inner_mut()).await?;
                }
                Interrupted::Value(Some(Err(e))) => {
                    return Err(self.abort(conn, Error::RowSource(e)).await);
                }
                Interrupted::Cancelled => {
                    return Err(self.abort(conn, Error::Canceled).await);
                }
                Interrupted::TimedOut => {
                    return Err(self.abort(conn, timeout_error()).await);
                }
            }
        }

        self.write_done(&mut buf, rows_sent);
        conn.finish_bulk_stream(buf.inner_mut()).await?;
        tracing::debug!(rows_sent, table = %self.table, "bulk stream flushed");

        // Phase 3: reconcile the server's completion stream.
        let mut server_error: Option<ServerError> = None;
        let mut row_count = 0u64;
        loop {
            let step = interruptible(&self.flag, deadline, conn.next_token()).await;
            match step {
                Interrupted::Value(token) => match token? {
                    Token::Error(e) => {
                        server_error.get_or_insert(e);
                    }
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                        if done.status.count {
                            row_count = done.row_count;
                        }
                        if !done.status.more {
                            conn.settle();
                            return match server_error {
                                Some(e) => Err(Error::from_server_error(e)),
                                None => Ok(row_count),
                            };
                        }
                    }
                    other => {
                        tracing::trace!(token = ?other, "bulk completion token");
                    }
                },
                Interrupted::Cancelled => {
                    return Err(self.abort(conn, Error::Canceled).await);
                }
                Interrupted::TimedOut => {
                    return Err(self.abort(conn, timeout_error()).await);
                }
            }
        }
    }

    /// Validate and encode one row as a ROW token into `buf`.
    fn encode_row(
        &self,
        row: BulkRow,
        column_names: &[String],
        options: &EncodeOptions,
        buf: &mut WriteBuffer,
    ) -> Result<()> {
        let cells = row.project(column_names);

        // Validate every cell before emitting any bytes, so a bad row
        // never leaves a half-written token behind.
        let mut validated = Vec::with_capacity(cells.len());
        for (column, cell) in self.columns.iter().zip(cells) {
            validated.push(column.data_type.validate(cell)?);
        }

        buf.put_u8(TokenType::Row as u8);
        for (column, cell) in self.columns.iter().zip(&validated) {
            let chunks = column.data_type.encode_value(cell, &column.spec, options)?;
            for chunk in chunks {
                buf.put_slice(&chunk);
            }
        }
        Ok(())
    }

    /// Abort path shared by cancellation, timeout, validation failure,
    /// and row-source failure: signal attention, drain to the server's
    /// acknowledgment, and hand back the original error.
    async fn abort<T>(&self, conn: &mut BulkConnection<T>, error: Error) -> Error
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!(%error, "aborting bulk load");

        if let Err(e) = conn.send_attention().await {
            tracing::warn!(error = %e, "failed to send attention; poisoning connection");
            conn.poison();
            return error;
        }
        if let Err(e) = conn.await_attention_ack().await {
            tracing::warn!(error = %e, "attention drain failed");
        }
        error
    }
}

enum Interrupted<V> {
    Value(V),
    Cancelled,
    TimedOut,
}

/// Await `fut`, but resolve early if the bulk load is cancelled or its
/// deadline passes. The cancel flag is re-checked on entry so a flag set
/// between suspension points is never missed.
async fn interruptible<F, V>(
    flag: &CancelFlag,
    deadline: Option<Instant>,
    fut: F,
) -> Interrupted<V>
where
    F: Future<Output = V>,
{
    if flag.is_cancelled() {
        return Interrupted::Cancelled;
    }

    tokio::select! {
        value = fut => Interrupted::Value(value),
        () = flag.notify.notified() => Interrupted::Cancelled,
        () = deadline_sleep(deadline) => Interrupted::TimedOut,
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
