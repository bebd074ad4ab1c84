//! TDS token stream definitions.
//!
//! Tokens are the tag-prefixed records inside a tabular response message.
//! Decoders follow the incremental convention: `Ok(None)` means more bytes
//! are needed, `Err` means the stream is corrupt. The tag byte is consumed
//! by the caller before dispatching.

use bytes::{Buf, BufMut};

use crate::codec::{read_b_varchar, read_u16, read_u32, read_u64, read_us_varchar};
use crate::error::ProtocolError;
use crate::metadata::{ColMetaData, RawRow};
use crate::version::TdsVersion;

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Done (DONE).
    Done = 0xFD,
    /// Done procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Done in procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Column ordering (ORDER).
    Order = 0xA9,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAD => Some(Self::LoginAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            0x79 => Some(Self::ReturnStatus),
            0xA9 => Some(Self::Order),
            _ => None,
        }
    }
}

/// Parsed TDS token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Column metadata describing result set structure.
    ColMetaData(ColMetaData),
    /// Row data, raw per-column bytes.
    Row(RawRow),
    /// Null bitmap compressed row.
    NbcRow(RawRow),
    /// Completion of a SQL statement.
    Done(Done),
    /// Completion of a stored procedure.
    DoneProc(Done),
    /// Completion within a stored procedure.
    DoneInProc(Done),
    /// Error message from the server.
    Error(ServerError),
    /// Informational message from the server.
    Info(ServerInfo),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// Return status from a stored procedure.
    ReturnStatus(i32),
    /// Column ordering information.
    Order(Order),
}

impl Token {
    /// Check if this token settles a request (a final DONE of any flavor).
    #[must_use]
    pub fn is_final_done(&self) -> bool {
        match self {
            Self::Done(done) | Self::DoneProc(done) | Self::DoneInProc(done) => !done.status.more,
            _ => false,
        }
    }
}

/// Done token status flags bit positions.
mod done_status_bits {
    pub const DONE_MORE: u16 = 0x0001;
    pub const DONE_ERROR: u16 = 0x0002;
    pub const DONE_INXACT: u16 = 0x0004;
    pub const DONE_COUNT: u16 = 0x0010;
    pub const DONE_ATTN: u16 = 0x0020;
    pub const DONE_SRVERROR: u16 = 0x0100;
}

/// DONE token status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// More results follow.
    pub more: bool,
    /// An error occurred in the current command.
    pub error: bool,
    /// A transaction is in progress.
    pub in_xact: bool,
    /// The row count is valid.
    pub count: bool,
    /// Attention acknowledgment (cancelled request).
    pub attn: bool,
    /// A server error terminated the statement.
    pub srverror: bool,
}

impl DoneStatus {
    /// Parse done status from raw bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        use done_status_bits::*;
        Self {
            more: (bits & DONE_MORE) != 0,
            error: (bits & DONE_ERROR) != 0,
            in_xact: (bits & DONE_INXACT) != 0,
            count: (bits & DONE_COUNT) != 0,
            attn: (bits & DONE_ATTN) != 0,
            srverror: (bits & DONE_SRVERROR) != 0,
        }
    }

    /// Convert to raw bits.
    #[must_use]
    pub fn to_bits(self) -> u16 {
        use done_status_bits::*;
        let mut bits = 0u16;
        if self.more {
            bits |= DONE_MORE;
        }
        if self.error {
            bits |= DONE_ERROR;
        }
        if self.in_xact {
            bits |= DONE_INXACT;
        }
        if self.count {
            bits |= DONE_COUNT;
        }
        if self.attn {
            bits |= DONE_ATTN;
        }
        if self.srverror {
            bits |= DONE_SRVERROR;
        }
        bits
    }
}

/// DONE token: statement completion with status and row count.
///
/// DONEPROC and DONEINPROC share the same layout.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Token of the current command.
    pub cur_cmd: u16,
    /// Row count (valid when `status.count` is set).
    pub row_count: u64,
}

impl Done {
    /// Decode a DONE payload. The row count is 8 bytes from TDS 7.2.
    pub fn decode(
        src: &mut impl Buf,
        version: TdsVersion,
    ) -> Result<Option<Self>, ProtocolError> {
        let Some(status_bits) = read_u16(src) else {
            return Ok(None);
        };
        let Some(cur_cmd) = read_u16(src) else {
            return Ok(None);
        };
        let row_count = if version.has_u64_row_count() {
            match read_u64(src) {
                Some(v) => v,
                None => return Ok(None),
            }
        } else {
            match read_u32(src) {
                Some(v) => u64::from(v),
                None => return Ok(None),
            }
        };

        Ok(Some(Self {
            status: DoneStatus::from_bits(status_bits),
            cur_cmd,
            row_count,
        }))
    }

    /// Encode a DONE token including the tag byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Check if this DONE acknowledges an attention signal.
    #[must_use]
    pub const fn is_attention_ack(&self) -> bool {
        self.status.attn
    }
}

/// Server error message (ERROR token).
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Error number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Error severity class.
    pub class: u8,
    /// Error message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerError {
    /// Decode an ERROR payload.
    pub fn decode(src: &mut impl Buf) -> Result<Option<Self>, ProtocolError> {
        decode_message_body(src).map(|body| {
            body.map(
                |(number, state, class, message, server, procedure, line)| Self {
                    number,
                    state,
                    class,
                    message,
                    server,
                    procedure,
                    line,
                },
            )
        })
    }

    /// Check if this is a fatal error (severity >= 20).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

/// Server informational message (INFO token).
///
/// Same wire layout as ERROR, lower severity.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Info number.
    pub number: i32,
    /// Info state.
    pub state: u8,
    /// Info class (severity).
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerInfo {
    /// Decode an INFO payload.
    pub fn decode(src: &mut impl Buf) -> Result<Option<Self>, ProtocolError> {
        decode_message_body(src).map(|body| {
            body.map(
                |(number, state, class, message, server, procedure, line)| Self {
                    number,
                    state,
                    class,
                    message,
                    server,
                    procedure,
                    line,
                },
            )
        })
    }
}

type MessageBody = (i32, u8, u8, String, String, String, i32);

/// Shared ERROR/INFO body: length, number, state, class, message,
/// server, procedure, line.
fn decode_message_body(src: &mut impl Buf) -> Result<Option<MessageBody>, ProtocolError> {
    let Some(length) = read_u16(src) else {
        return Ok(None);
    };
    if src.remaining() < length as usize {
        return Ok(None);
    }

    let mut body = src.copy_to_bytes(length as usize);
    if body.remaining() < 6 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let number = body.get_i32_le();
    let state = body.get_u8();
    let class = body.get_u8();
    let message = read_us_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
    let server = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
    let procedure = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
    if body.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let line = body.get_i32_le();

    Ok(Some((number, state, class, message, server, procedure, line)))
}

/// Login acknowledgment token.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Interface type.
    pub interface: u8,
    /// Negotiated TDS version (raw wire value).
    pub tds_version: u32,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: u32,
}

impl LoginAck {
    /// Decode a LOGINACK payload.
    pub fn decode(src: &mut impl Buf) -> Result<Option<Self>, ProtocolError> {
        let Some(length) = read_u16(src) else {
            return Ok(None);
        };
        if src.remaining() < length as usize {
            return Ok(None);
        }

        let mut body = src.copy_to_bytes(length as usize);
        if body.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let interface = body.get_u8();
        let tds_version = body.get_u32_le();
        let prog_name = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
        if body.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let prog_version = body.get_u32_le();

        Ok(Some(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        }))
    }

    /// Resolve the negotiated version, if known.
    #[must_use]
    pub fn version(&self) -> Option<TdsVersion> {
        TdsVersion::from_wire_value(self.tds_version)
    }
}

/// Environment change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Database changed.
    Database = 1,
    /// Language changed.
    Language = 2,
    /// Character set changed.
    CharacterSet = 3,
    /// Packet size changed.
    PacketSize = 4,
    /// SQL collation changed.
    SqlCollation = 7,
    /// Transaction began.
    BeginTransaction = 8,
    /// Transaction committed.
    CommitTransaction = 9,
    /// Transaction rolled back.
    RollbackTransaction = 10,
    /// Connection reset completed.
    ResetConnectionAck = 18,
}

impl EnvChangeType {
    /// Create from raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Database),
            2 => Some(Self::Language),
            3 => Some(Self::CharacterSet),
            4 => Some(Self::PacketSize),
            7 => Some(Self::SqlCollation),
            8 => Some(Self::BeginTransaction),
            9 => Some(Self::CommitTransaction),
            10 => Some(Self::RollbackTransaction),
            18 => Some(Self::ResetConnectionAck),
            _ => None,
        }
    }
}

/// Environment change token.
///
/// Values are kept raw; only the changes this driver acts on (packet size,
/// collation) get typed accessors.
#[derive(Debug, Clone)]
pub struct EnvChange {
    /// Type of environment change, when recognized.
    pub env_type: Option<EnvChangeType>,
    /// New value bytes.
    pub new_value: bytes::Bytes,
    /// Old value bytes.
    pub old_value: bytes::Bytes,
}

impl EnvChange {
    /// Decode an ENVCHANGE payload.
    ///
    /// Unrecognized change types are preserved with `env_type = None` so the
    /// state machine can log and skip them.
    pub fn decode(src: &mut impl Buf) -> Result<Option<Self>, ProtocolError> {
        let Some(length) = read_u16(src) else {
            return Ok(None);
        };
        if src.remaining() < length as usize {
            return Ok(None);
        }

        let mut body = src.copy_to_bytes(length as usize);
        if !body.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let env_type = EnvChangeType::from_u8(body.get_u8());

        // Both values are B_VARBYTE (length-prefixed raw bytes); string
        // values are UCS-2 inside.
        let new_len = if body.has_remaining() {
            body.get_u8() as usize
        } else {
            0
        };
        let new_len = match env_type {
            // String-valued changes count characters
            Some(
                EnvChangeType::Database
                | EnvChangeType::Language
                | EnvChangeType::CharacterSet
                | EnvChangeType::PacketSize,
            ) => new_len * 2,
            _ => new_len,
        };
        let new_value = if body.remaining() >= new_len {
            body.copy_to_bytes(new_len)
        } else {
            bytes::Bytes::new()
        };

        let old_len = if body.has_remaining() {
            body.get_u8() as usize
        } else {
            0
        };
        let old_len = match env_type {
            Some(
                EnvChangeType::Database
                | EnvChangeType::Language
                | EnvChangeType::CharacterSet
                | EnvChangeType::PacketSize,
            ) => old_len * 2,
            _ => old_len,
        };
        let old_value = if body.remaining() >= old_len {
            body.copy_to_bytes(old_len)
        } else {
            bytes::Bytes::new()
        };

        Ok(Some(Self {
            env_type,
            new_value,
            old_value,
        }))
    }

    /// Get the new packet size if this is a packet size change.
    #[must_use]
    pub fn new_packet_size(&self) -> Option<usize> {
        if self.env_type != Some(EnvChangeType::PacketSize) {
            return None;
        }
        let chars: Vec<u16> = self
            .new_value
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&chars).ok()?.parse().ok()
    }
}

/// Column ordering information (ORDER token).
#[derive(Debug, Clone)]
pub struct Order {
    /// Ordered column indices.
    pub columns: Vec<u16>,
}

impl Order {
    /// Decode an ORDER payload.
    pub fn decode(src: &mut impl Buf) -> Result<Option<Self>, ProtocolError> {
        let Some(length) = read_u16(src) else {
            return Ok(None);
        };
        if src.remaining() < length as usize {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(length as usize / 2);
        let mut body = src.copy_to_bytes(length as usize);
        while body.remaining() >= 2 {
            columns.push(body.get_u16_le());
        }

        Ok(Some(Self { columns }))
    }
}

/// Decode a RETURNSTATUS payload.
pub fn decode_return_status(src: &mut impl Buf) -> Result<Option<i32>, ProtocolError> {
    if src.remaining() < 4 {
        return Ok(None);
    }
    Ok(Some(src.get_i32_le()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::WriteBuffer;

    #[test]
    fn test_done_roundtrip() {
        let done = Done {
            status: DoneStatus {
                count: true,
                ..Default::default()
            },
            cur_cmd: 193,
            row_count: 42,
        };

        let mut buf = bytes::BytesMut::new();
        done.encode(&mut buf);

        // Skip the token tag byte.
        let mut cursor = &buf[1..];
        let decoded = Done::decode(&mut cursor, TdsVersion::V7_4).unwrap().unwrap();

        assert_eq!(decoded.status, done.status);
        assert_eq!(decoded.cur_cmd, done.cur_cmd);
        assert_eq!(decoded.row_count, done.row_count);
    }

    #[test]
    fn test_done_u32_row_count_on_legacy_version() {
        let raw = [
            0x10, 0x00, // status: COUNT
            0x00, 0x00, // cur_cmd
            0x05, 0x00, 0x00, 0x00, // row_count (4 bytes on TDS 7.1)
        ];
        let mut cursor = &raw[..];
        let done = Done::decode(&mut cursor, TdsVersion::V7_1).unwrap().unwrap();
        assert_eq!(done.row_count, 5);
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn test_done_attention_ack() {
        let done = Done {
            status: DoneStatus::from_bits(0x0020),
            cur_cmd: 0,
            row_count: 0,
        };
        assert!(done.is_attention_ack());
    }

    #[test]
    fn test_server_error_decode() {
        let mut body = WriteBuffer::new();
        body.put_i32(2627);
        body.put_u8(1); // state
        body.put_u8(14); // class
        body.put_us_varchar("Violation of PRIMARY KEY constraint");
        body.put_b_varchar("server");
        body.put_b_varchar("");
        body.put_i32(1);
        let body = body.take();

        let mut buf = WriteBuffer::new();
        buf.put_u16(body.len() as u16);
        buf.put_slice(&body);
        let bytes = buf.take();

        let mut cursor = bytes.as_ref();
        let error = ServerError::decode(&mut cursor).unwrap().unwrap();
        assert_eq!(error.number, 2627);
        assert_eq!(error.class, 14);
        assert_eq!(error.message, "Violation of PRIMARY KEY constraint");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_error_decode_needs_more() {
        // Length claims 30 bytes, only 4 present.
        let raw = [30u8, 0, 1, 2, 3, 4];
        let mut cursor = &raw[..];
        assert!(ServerError::decode(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_env_change_packet_size() {
        let mut body = WriteBuffer::new();
        body.put_u8(4); // PacketSize
        body.put_b_varchar("8192");
        body.put_b_varchar("4096");
        let body = body.take();

        let mut buf = WriteBuffer::new();
        buf.put_u16(body.len() as u16);
        buf.put_slice(&body);
        let bytes = buf.take();

        let mut cursor = bytes.as_ref();
        let env = EnvChange::decode(&mut cursor).unwrap().unwrap();
        assert_eq!(env.env_type, Some(EnvChangeType::PacketSize));
        assert_eq!(env.new_packet_size(), Some(8192));
    }

    #[test]
    fn test_order_decode() {
        let raw = [4u8, 0, 1, 0, 3, 0];
        let mut cursor = &raw[..];
        let order = Order::decode(&mut cursor).unwrap().unwrap();
        assert_eq!(order.columns, vec![1, 3]);
    }

    #[test]
    fn test_token_type_from_u8() {
        assert_eq!(TokenType::from_u8(0x81), Some(TokenType::ColMetaData));
        assert_eq!(TokenType::from_u8(0xFD), Some(TokenType::Done));
        assert_eq!(TokenType::from_u8(0xD2), Some(TokenType::NbcRow));
        assert_eq!(TokenType::from_u8(0x42), None);
    }
}
