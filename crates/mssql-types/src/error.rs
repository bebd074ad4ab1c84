//! Type validation and conversion errors.

use thiserror::Error;

/// Errors produced while validating or encoding SQL values.
///
/// Validation failures carry the canonical driver messages; the bulk engine
/// surfaces them verbatim to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Value could not be coerced to a date.
    #[error("Invalid date.")]
    InvalidDate,

    /// Value could not be coerced to a time.
    #[error("Invalid time.")]
    InvalidTime,

    /// Value could not be coerced to a number.
    #[error("Invalid number.")]
    InvalidNumber,

    /// Value is not a string.
    #[error("Invalid string.")]
    InvalidString,

    /// Value is not a byte buffer.
    #[error("Invalid buffer.")]
    InvalidBuffer,

    /// Value could not be coerced to a GUID.
    #[error("Invalid GUID.")]
    InvalidGuid,

    /// Value could not be coerced to a boolean.
    #[error("Invalid boolean.")]
    InvalidBoolean,

    /// Value is out of range for the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target SQL type name.
        target_type: &'static str,
    },

    /// NULL supplied for a non-nullable column.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Value exceeds what the declared column length can hold.
    #[error("value of {actual} bytes exceeds the declared length of {declared}")]
    TooLong {
        /// Encoded value size.
        actual: usize,
        /// Declared column capacity.
        declared: usize,
    },

    /// No conversion exists between the value and the target type.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source value type name.
        from: &'static str,
        /// Target SQL type name.
        to: &'static str,
    },
}
