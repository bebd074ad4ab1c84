//! Client error types.

use thiserror::Error;

/// An error raised by a row source, type-erased.
///
/// The original error value is preserved; callers can recover it with
/// [`std::error::Error::downcast_ref`] through [`Error::RowSource`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during bulk-load operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was cancelled.
    #[error("Canceled.")]
    Canceled,

    /// The request timed out before completing.
    #[error("Timeout: Request failed to complete in {0}ms")]
    Timeout(u64),

    /// Column configuration attempted after execution started.
    #[error("Columns cannot be added to bulk insert after execution has started.")]
    ColumnsSealed,

    /// A key in the `order` option carries a direction other than
    /// `"ASC"` or `"DESC"`.
    #[error(
        "The value of the \"{0}\" key in the \"options.order\" object must be either \"ASC\" or \"DESC\"."
    )]
    InvalidOrderDirection(String),

    /// Bulk-load configuration problem (unknown type, no columns, reuse).
    #[error("bulk load error: {0}")]
    BulkLoad(String),

    /// A cell failed type validation.
    #[error(transparent)]
    Type(#[from] mssql_types::TypeError),

    /// The caller-supplied row source raised mid-stream.
    #[error(transparent)]
    RowSource(BoxError),

    /// The server reported an error for the current request.
    ///
    /// Displays as the server's message text.
    #[error("{message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error state.
        state: u8,
        /// Error severity class.
        class: u8,
        /// Server message text.
        message: String,
        /// Server name.
        server: String,
        /// Procedure name.
        procedure: String,
        /// Line number.
        line: i32,
    },

    /// Framing or transport failure.
    #[error("codec error: {0}")]
    Codec(#[from] mssql_codec::CodecError),

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// Transport closed mid-request.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server never acknowledged a cancellation; the connection was
    /// torn down.
    #[error("cancel was not acknowledged within the cancel timeout")]
    CancelTimeout,

    /// Operation attempted in the wrong connection state.
    #[error("invalid connection state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Build a [`Error::Server`] from a decoded ERROR token.
    #[must_use]
    pub fn from_server_error(err: tds_protocol::ServerError) -> Self {
        Self::Server {
            number: err.number,
            state: err.state,
            class: err.class,
            message: err.message,
            server: err.server,
            procedure: err.procedure,
            line: err.line,
        }
    }

    /// Check if this error ends the connection (rather than just the
    /// request).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Protocol(_) | Self::ConnectionClosed | Self::CancelTimeout
        )
    }
}

/// Result type for bulk-load operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_messages() {
        assert_eq!(Error::Canceled.to_string(), "Canceled.");
        assert_eq!(
            Error::Timeout(200).to_string(),
            "Timeout: Request failed to complete in 200ms"
        );
        assert_eq!(
            Error::ColumnsSealed.to_string(),
            "Columns cannot be added to bulk insert after execution has started."
        );
        assert_eq!(
            Error::InvalidOrderDirection("id".into()).to_string(),
            "The value of the \"id\" key in the \"options.order\" object must be either \"ASC\" or \"DESC\"."
        );
    }

    #[test]
    fn test_server_error_displays_message_text() {
        let err = Error::Server {
            number: 4819,
            state: 1,
            class: 16,
            message: "Cannot bulk load.".into(),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        };
        assert_eq!(err.to_string(), "Cannot bulk load.");
    }

    #[test]
    fn test_type_error_is_transparent() {
        let err = Error::Type(mssql_types::TypeError::InvalidDate);
        assert_eq!(err.to_string(), "Invalid date.");
    }

    #[test]
    fn test_row_source_error_preserves_identity() {
        #[derive(Debug, thiserror::Error, PartialEq)]
        #[error("boom")]
        struct Boom(u32);

        let err = Error::RowSource(Box::new(Boom(7)));
        match &err {
            Error::RowSource(inner) => {
                assert_eq!(inner.downcast_ref::<Boom>(), Some(&Boom(7)));
            }
            _ => unreachable!(),
        }
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::CancelTimeout.is_fatal());
        assert!(!Error::Canceled.is_fatal());
        assert!(!Error::Timeout(10).is_fatal());
    }
}
