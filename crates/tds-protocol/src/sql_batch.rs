//! SQL batch request encoding.
//!
//! A SQL batch payload (packet type 0x01) is the ALL_HEADERS section
//! required from TDS 7.2 followed by the statement text in UTF-16LE. The
//! bulk-load engine sends its `insert bulk` prelude this way before
//! switching to the bulk data stream.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;

/// ALL_HEADERS size with the single transaction-descriptor header.
const ALL_HEADERS_LEN: u32 = 22;

/// Encode a SQL batch payload in auto-commit mode.
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    encode_sql_batch_with_transaction(sql, 0)
}

/// Encode a SQL batch payload with a transaction descriptor.
///
/// Inside an explicit transaction the descriptor must be the value the
/// server returned in the BeginTransaction ENVCHANGE; auto-commit uses 0.
#[must_use]
pub fn encode_sql_batch_with_transaction(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN as usize + sql.len() * 2);

    buf.put_u32_le(ALL_HEADERS_LEN);
    buf.put_u32_le(18); // this header's length
    buf.put_u16_le(0x0002); // transaction descriptor header
    buf.put_u64_le(transaction_descriptor);
    buf.put_u32_le(1); // outstanding request count

    write_utf16_string(&mut buf, sql);

    buf.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sql_batch_layout() {
        let payload = encode_sql_batch("SELECT 1");

        // ALL_HEADERS (22) + 8 UTF-16 characters
        assert_eq!(payload.len(), 38);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[4..8], &[18, 0, 0, 0]);
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(payload[22], b'S');
        assert_eq!(payload[23], 0);
    }

    #[test]
    fn test_empty_batch_is_headers_only() {
        assert_eq!(encode_sql_batch("").len(), 22);
    }
}
