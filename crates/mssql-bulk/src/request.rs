//! Request/connection state machine.
//!
//! [`BulkConnection`] owns the framed transport and multiplexes its token
//! stream to the active request. The lifecycle the bulk engine observes:
//!
//! ```text
//! Connecting → LoggedIn → SentClientRequest → LoggedIn        (final DONE)
//!                              ↓ attention
//!                         SentAttention → LoggedIn            (attention ack)
//!                              ↓ cancel timeout / fatal error
//!                            Final
//! ```
//!
//! Exactly one of {final DONE, fatal error, attention ack} settles a
//! request; after settling, a healthy connection is immediately reusable.

use bytes::BytesMut;
use mssql_codec::connection::CancelHandle;
use mssql_codec::{Connection, TokenStreamDecoder};
use tds_protocol::packet::PacketType;
use tds_protocol::sql_batch::encode_sql_batch;
use tds_protocol::token::Token;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::{Error, Result};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport establishment / login in progress.
    Connecting,
    /// Idle and ready for a request.
    LoggedIn,
    /// A request is on the wire; reading its response.
    SentClientRequest,
    /// An attention was sent; draining until the server acknowledges.
    SentAttention,
    /// Connection is unusable.
    Final,
}

impl ConnectionState {
    /// The state's name, for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::LoggedIn => "LoggedIn",
            Self::SentClientRequest => "SentClientRequest",
            Self::SentAttention => "SentAttention",
            Self::Final => "Final",
        }
    }
}

/// A logged-in TDS connection scoped to bulk-load traffic.
///
/// The caller supplies an authenticated duplex transport; login and TLS
/// are outside this crate.
pub struct BulkConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    conn: Connection<T>,
    decoder: TokenStreamDecoder,
    state: ConnectionState,
    config: Config,
}

impl<T> BulkConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an authenticated transport.
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            conn: Connection::with_packet_size(transport, config.packet_size),
            decoder: TokenStreamDecoder::new(config.tds_version),
            state: ConnectionState::LoggedIn,
            config,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current lifecycle state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Connection configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for out-of-band cancellation.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        self.conn.cancel_handle()
    }

    fn begin_request(&mut self) -> Result<()> {
        if self.state != ConnectionState::LoggedIn {
            return Err(Error::InvalidState(self.state.name()));
        }
        self.state = ConnectionState::SentClientRequest;
        self.decoder.reset();
        Ok(())
    }

    /// Send a SQL batch request.
    pub async fn send_sql_batch(&mut self, sql: &str) -> Result<()> {
        self.begin_request()?;
        tracing::debug!(sql, "sending SQL batch");
        let payload = encode_sql_batch(sql);
        self.conn
            .send_message(PacketType::SqlBatch, &payload)
            .await?;
        Ok(())
    }

    /// Begin the bulk data stream for a request already in flight at the
    /// SQL level (the `insert bulk` prelude has completed). Restarts the
    /// packet sequence for the new message.
    pub async fn begin_bulk_stream(&mut self) -> Result<()> {
        self.begin_request()?;
        self.conn.reset_packet_sequence().await;
        Ok(())
    }

    /// Stream full packets of bulk data out of `buf`, leaving less than
    /// one packet's payload buffered.
    pub async fn write_bulk_chunk(&mut self, buf: &mut BytesMut) -> Result<()> {
        self.conn.send_partial(PacketType::BulkLoad, buf).await?;
        Ok(())
    }

    /// Flush the remainder of the bulk stream with `END_OF_MESSAGE`.
    pub async fn finish_bulk_stream(&mut self, buf: &mut BytesMut) -> Result<()> {
        self.conn.finish_message(PacketType::BulkLoad, buf).await?;
        Ok(())
    }

    /// Read the next token of the active request's response.
    ///
    /// Pulls inbound messages as needed; a transport close mid-request is
    /// fatal.
    pub async fn next_token(&mut self) -> Result<Token> {
        loop {
            if let Some(token) = self.decoder.try_next()? {
                return Ok(token);
            }
            match self.conn.read_message().await? {
                Some(message) => self.decoder.push(&message.payload),
                None => {
                    self.state = ConnectionState::Final;
                    return Err(Error::ConnectionClosed);
                }
            }
        }
    }

    /// Mark the active request settled by its final DONE.
    pub fn settle(&mut self) {
        if self.state == ConnectionState::SentClientRequest {
            self.state = ConnectionState::LoggedIn;
        }
        self.decoder.reset();
    }

    /// Mark the connection unusable after a fatal error.
    pub fn poison(&mut self) {
        self.state = ConnectionState::Final;
    }

    /// Send an attention signal and switch the token stream into drain
    /// mode.
    pub async fn send_attention(&mut self) -> Result<()> {
        if self.state == ConnectionState::SentAttention {
            return Ok(());
        }
        self.conn.cancel_handle().cancel().await?;
        self.decoder.set_cancelled();
        self.state = ConnectionState::SentAttention;
        Ok(())
    }

    /// Drain inbound tokens until the server acknowledges the attention,
    /// then return the connection to `LoggedIn`.
    ///
    /// If no acknowledgment arrives within the configured cancel timeout
    /// the connection is torn down.
    pub async fn await_attention_ack(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, ConnectionState::SentAttention);

        let cancel_timeout = self.config.cancel_timeout;
        let drain = async {
            loop {
                let token = self.next_token().await?;
                match &token {
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done)
                        if done.is_attention_ack() =>
                    {
                        return Ok::<(), Error>(());
                    }
                    _ => {}
                }
            }
        };

        // Bound to a variable so the drain future's borrow of `self` ends
        // before the arms run.
        let drained = tokio::time::timeout(cancel_timeout, drain).await;
        match drained {
            Ok(Ok(())) => {
                tracing::debug!("attention acknowledged");
                self.conn.finish_cancel();
                self.decoder.reset();
                self.state = ConnectionState::LoggedIn;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Final;
                Err(e)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_ms = cancel_timeout.as_millis() as u64,
                    "attention not acknowledged; tearing down connection"
                );
                self.state = ConnectionState::Final;
                Err(Error::CancelTimeout)
            }
        }
    }
}

impl<T> std::fmt::Debug for BulkConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkConnection")
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}
