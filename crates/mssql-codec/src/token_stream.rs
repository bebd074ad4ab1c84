//! Incremental token stream decoding.
//!
//! [`TokenStreamDecoder`] is the suspendable reader over a response message
//! stream: bytes from inbound messages are pushed in as they arrive, and
//! [`TokenStreamDecoder::try_next`] yields at most one token per call so the
//! consumer controls the pace. When the buffered bytes hold only a prefix of
//! a token, the decoder returns `Ok(None)` and re-parses from the token tag
//! once more bytes arrive; consumption is committed only for whole tokens.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tds_protocol::error::ProtocolError;
use tds_protocol::metadata::{ColMetaData, ColumnMetadata, read_nbc_row, read_row};
use tds_protocol::token::{
    Done, EnvChange, LoginAck, Order, ServerError, ServerInfo, Token, TokenType,
    decode_return_status,
};
use tds_protocol::version::TdsVersion;

/// Suspendable decoder for the response token stream.
#[derive(Debug)]
pub struct TokenStreamDecoder {
    buffer: BytesMut,
    /// Columns from the most recent COLMETADATA; required to parse rows.
    columns: Option<Arc<[ColumnMetadata]>>,
    version: TdsVersion,
    /// Drain mode: discard everything until a DONE with the attention flag.
    cancelled: bool,
    /// The attention ack has been yielded; the stream is over.
    finished: bool,
}

impl TokenStreamDecoder {
    /// Create a decoder for the given protocol version.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self {
            buffer: BytesMut::new(),
            columns: None,
            version,
            cancelled: false,
            finished: false,
        }
    }

    /// Append inbound message bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Switch into drain mode after an attention was sent: subsequent
    /// tokens are discarded until the server acknowledges the cancellation
    /// with an attention-flagged DONE, which is yielded, after which the
    /// decoder terminates.
    pub fn set_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Check if the attention ack terminated the stream.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Columns from the most recent COLMETADATA token.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<[ColumnMetadata]>> {
        self.columns.as_ref()
    }

    /// Discard buffered bytes and column state for a new request.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.columns = None;
        self.cancelled = false;
        self.finished = false;
    }

    /// Try to decode the next token.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete token; push
    /// more bytes and call again. An unknown tag is a fatal protocol error.
    pub fn try_next(&mut self) -> Result<Option<Token>, ProtocolError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let Some(token) = self.decode_one()? else {
                return Ok(None);
            };

            if self.cancelled {
                // Drain: only the attention ack escapes.
                match &token {
                    Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done)
                        if done.is_attention_ack() =>
                    {
                        self.finished = true;
                        return Ok(Some(token));
                    }
                    _ => continue,
                }
            }

            return Ok(Some(token));
        }
    }

    /// Decode exactly one token from the front of the buffer, committing
    /// consumption only on success.
    fn decode_one(&mut self) -> Result<Option<Token>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let tag = self.buffer[0];
        let token_type = TokenType::from_u8(tag).ok_or(ProtocolError::UnknownToken(tag))?;

        let mut cursor = &self.buffer[1..];
        let before = cursor.len();

        let token = match token_type {
            TokenType::ColMetaData => ColMetaData::decode(&mut cursor, self.version)?.map(|meta| {
                self.columns = Some(Arc::from(meta.columns.clone().into_boxed_slice()));
                Token::ColMetaData(meta)
            }),
            TokenType::Row => {
                let columns = self
                    .columns
                    .clone()
                    .ok_or(ProtocolError::MissingMetadata(tag))?;
                read_row(&mut cursor, &columns)?.map(Token::Row)
            }
            TokenType::NbcRow => {
                let columns = self
                    .columns
                    .clone()
                    .ok_or(ProtocolError::MissingMetadata(tag))?;
                read_nbc_row(&mut cursor, &columns)?.map(Token::NbcRow)
            }
            TokenType::Done => Done::decode(&mut cursor, self.version)?.map(Token::Done),
            TokenType::DoneProc => Done::decode(&mut cursor, self.version)?.map(Token::DoneProc),
            TokenType::DoneInProc => {
                Done::decode(&mut cursor, self.version)?.map(Token::DoneInProc)
            }
            TokenType::Error => ServerError::decode(&mut cursor)?.map(Token::Error),
            TokenType::Info => ServerInfo::decode(&mut cursor)?.map(Token::Info),
            TokenType::LoginAck => LoginAck::decode(&mut cursor)?.map(Token::LoginAck),
            TokenType::EnvChange => EnvChange::decode(&mut cursor)?.map(Token::EnvChange),
            TokenType::ReturnStatus => decode_return_status(&mut cursor)?.map(Token::ReturnStatus),
            TokenType::Order => Order::decode(&mut cursor)?.map(Token::Order),
        };

        match token {
            Some(token) => {
                let consumed = 1 + (before - cursor.len());
                self.buffer.advance(consumed);
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::WriteBuffer;
    use tds_protocol::token::DoneStatus;
    use tds_protocol::types::TypeId;

    fn done_bytes(status: u16, row_count: u64) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        buf.put_u8(TokenType::Done as u8);
        buf.put_u16(status);
        buf.put_u16(0);
        buf.put_u64(row_count);
        buf.take().to_vec()
    }

    fn colmetadata_bytes(names: &[&str]) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        buf.put_u8(TokenType::ColMetaData as u8);
        buf.put_u16(names.len() as u16);
        for name in names {
            buf.put_u32(0);
            buf.put_u16(0x0001);
            buf.put_u8(TypeId::Int4 as u8);
            buf.put_b_varchar(name);
        }
        buf.take().to_vec()
    }

    #[test]
    fn test_decode_done() {
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        decoder.push(&done_bytes(0x0010, 7));

        match decoder.try_next().unwrap().unwrap() {
            Token::Done(done) => {
                assert!(done.status.count);
                assert_eq!(done.row_count, 7);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn test_incremental_parse_across_arbitrary_splits() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&colmetadata_bytes(&["id", "total"]));
        // ROW: 2 int values
        stream.push(TokenType::Row as u8);
        stream.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);
        stream.extend_from_slice(&done_bytes(0x0010, 1));

        // Feed one byte at a time; the decoder must produce the same
        // tokens regardless of split points.
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        let mut tokens = Vec::new();
        for byte in &stream {
            decoder.push(std::slice::from_ref(byte));
            while let Some(token) = decoder.try_next().unwrap() {
                tokens.push(token);
            }
        }

        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[0], Token::ColMetaData(_)));
        match &tokens[1] {
            Token::Row(row) => {
                assert_eq!(row.values.len(), 2);
                assert_eq!(row.values[0].as_deref(), Some(&[1u8, 0, 0, 0][..]));
            }
            other => panic!("expected Row, got {other:?}"),
        }
        assert!(matches!(tokens[2], Token::Done(_)));
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        decoder.push(&[0x42]);
        assert!(matches!(
            decoder.try_next(),
            Err(ProtocolError::UnknownToken(0x42))
        ));
    }

    #[test]
    fn test_row_without_metadata_is_fatal() {
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        decoder.push(&[TokenType::Row as u8, 1, 0, 0, 0]);
        assert!(decoder.try_next().is_err());
    }

    #[test]
    fn test_drain_mode_discards_until_attention_ack() {
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        decoder.set_cancelled();

        decoder.push(&colmetadata_bytes(&["id"]));
        decoder.push(&done_bytes(0x0001, 0)); // DONE_MORE, not the ack
        decoder.push(&done_bytes(0x0020, 0)); // attention ack

        let token = decoder.try_next().unwrap().unwrap();
        match token {
            Token::Done(done) => assert!(done.is_attention_ack()),
            other => panic!("expected attention DONE, got {other:?}"),
        }
        assert!(decoder.is_finished());
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn test_lazy_one_token_per_call() {
        let mut decoder = TokenStreamDecoder::new(TdsVersion::V7_4);
        decoder.push(&done_bytes(0x0001, 0));
        decoder.push(&done_bytes(0x0010, 3));

        let first = decoder.try_next().unwrap().unwrap();
        assert!(matches!(first, Token::Done(done) if done.status.more));
        // Second token still buffered, delivered on demand.
        assert_eq!(decoder.buffered(), 13);
        let second = decoder.try_next().unwrap().unwrap();
        assert!(matches!(second, Token::Done(done) if done.row_count == 3));
    }

    #[test]
    fn test_done_status_roundtrip() {
        let status = DoneStatus::from_bits(0x0031);
        assert!(status.more && status.count && status.attn);
        assert_eq!(status.to_bits(), 0x0031);
    }
}
