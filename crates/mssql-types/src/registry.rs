//! The data type registry.
//!
//! One [`DataType`] entry per SQL type this driver can write, addressable
//! by wire id and by name. The registry is process-wide and immutable after
//! first use; entries describe how to declare a column in DDL, how to emit
//! its TYPE_INFO block, how to frame a value's length prefix, how to encode
//! the value bytes, and how to validate a loosely-typed cell before
//! encoding.
//!
//! Fixed-width types are emitted through their nullable wire variants
//! (INT → INTNTYPE with length 4, and so on) so NULL cells can be expressed
//! with a zero length, matching what the server itself sends for bulk
//! column descriptors.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use tds_protocol::WriteBuffer;
use tds_protocol::collation::Collation;
use tds_protocol::metadata::MAX_LENGTH;
use tds_protocol::types::TypeId;

use crate::encode;
use crate::error::TypeError;
use crate::value::SqlValue;

/// PLP chunk size for streamed `max` values.
const PLP_CHUNK_SIZE: usize = 8192;

/// PLP NULL marker.
const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Per-column parameters a type needs for declaration and encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnSpec {
    /// Column accepts NULL.
    pub nullable: bool,
    /// Declared length, in type units (characters for character types,
    /// bytes for binary). `None` means `max` for variable types.
    pub length: Option<u32>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and scaled time types.
    pub scale: Option<u8>,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

/// Options applied while encoding values.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Encode instant-bearing values relative to UTC rather than the local
    /// timezone.
    pub use_utc: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { use_utc: true }
    }
}

/// A lazy sequence of encoded byte chunks.
///
/// Small values produce a single chunk; PLP (`max`) values produce one
/// chunk per PLP frame so a large value never has to be copied into one
/// contiguous buffer. Chunks share the underlying allocation.
#[derive(Debug, Clone, Default)]
pub struct ValueChunks {
    chunks: SmallVec<[Bytes; 2]>,
    next: usize,
}

impl ValueChunks {
    /// A sequence with no bytes at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-chunk sequence.
    #[must_use]
    pub fn single(chunk: Bytes) -> Self {
        let mut chunks = SmallVec::new();
        chunks.push(chunk);
        Self { chunks, next: 0 }
    }

    fn push(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    /// Total byte length across all remaining chunks.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.chunks[self.next..].iter().map(Bytes::len).sum()
    }
}

impl Iterator for ValueChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.get(self.next)?.clone();
        self.next += 1;
        Some(chunk)
    }
}

/// A registered SQL data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// TINYINT.
    TinyInt,
    /// SMALLINT.
    SmallInt,
    /// INT.
    Int,
    /// BIGINT.
    BigInt,
    /// REAL.
    Real,
    /// FLOAT.
    Float,
    /// BIT.
    Bit,
    /// SMALLDATETIME.
    SmallDateTime,
    /// DATETIME.
    DateTime,
    /// SMALLMONEY.
    SmallMoney,
    /// MONEY.
    Money,
    /// UNIQUEIDENTIFIER.
    UniqueIdentifier,
    /// DECIMAL.
    Decimal,
    /// NUMERIC.
    Numeric,
    /// CHAR.
    Char,
    /// VARCHAR.
    VarChar,
    /// NCHAR.
    NChar,
    /// NVARCHAR.
    NVarChar,
    /// BINARY.
    Binary,
    /// VARBINARY.
    VarBinary,
    /// TEXT.
    Text,
    /// NTEXT.
    NText,
    /// IMAGE.
    Image,
    /// XML.
    Xml,
    /// DATE.
    Date,
    /// TIME.
    Time,
    /// DATETIME2.
    DateTime2,
    /// DATETIMEOFFSET.
    DateTimeOffset,
}

/// Every registered type, in registry order.
pub const ALL_TYPES: &[DataType] = &[
    DataType::TinyInt,
    DataType::SmallInt,
    DataType::Int,
    DataType::BigInt,
    DataType::Real,
    DataType::Float,
    DataType::Bit,
    DataType::SmallDateTime,
    DataType::DateTime,
    DataType::SmallMoney,
    DataType::Money,
    DataType::UniqueIdentifier,
    DataType::Decimal,
    DataType::Numeric,
    DataType::Char,
    DataType::VarChar,
    DataType::NChar,
    DataType::NVarChar,
    DataType::Binary,
    DataType::VarBinary,
    DataType::Text,
    DataType::NText,
    DataType::Image,
    DataType::Xml,
    DataType::Date,
    DataType::Time,
    DataType::DateTime2,
    DataType::DateTimeOffset,
];

static BY_ID: Lazy<HashMap<u8, DataType>> = Lazy::new(|| {
    ALL_TYPES.iter().map(|t| (t.id() as u8, *t)).collect()
});

static BY_NAME: Lazy<HashMap<String, DataType>> = Lazy::new(|| {
    ALL_TYPES
        .iter()
        .map(|t| (t.name().to_ascii_lowercase(), *t))
        .collect()
});

impl DataType {
    /// Look up a type by its wire id.
    #[must_use]
    pub fn by_id(id: u8) -> Option<Self> {
        BY_ID.get(&id).copied()
    }

    /// Look up a type by name, case-insensitively.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        BY_NAME.get(&name.to_ascii_lowercase()).copied()
    }

    /// The wire id written as this type's own tag.
    #[must_use]
    pub const fn id(self) -> TypeId {
        match self {
            Self::TinyInt => TypeId::Int1,
            Self::SmallInt => TypeId::Int2,
            Self::Int => TypeId::Int4,
            Self::BigInt => TypeId::Int8,
            Self::Real => TypeId::Float4,
            Self::Float => TypeId::Float8,
            Self::Bit => TypeId::Bit,
            Self::SmallDateTime => TypeId::DateTime4,
            Self::DateTime => TypeId::DateTime,
            Self::SmallMoney => TypeId::Money4,
            Self::Money => TypeId::Money,
            Self::UniqueIdentifier => TypeId::Guid,
            Self::Decimal => TypeId::DecimalN,
            Self::Numeric => TypeId::NumericN,
            Self::Char => TypeId::BigChar,
            Self::VarChar => TypeId::BigVarChar,
            Self::NChar => TypeId::NChar,
            Self::NVarChar => TypeId::NVarChar,
            Self::Binary => TypeId::BigBinary,
            Self::VarBinary => TypeId::BigVarBinary,
            Self::Text => TypeId::Text,
            Self::NText => TypeId::NText,
            Self::Image => TypeId::Image,
            Self::Xml => TypeId::Xml,
            Self::Date => TypeId::Date,
            Self::Time => TypeId::Time,
            Self::DateTime2 => TypeId::DateTime2,
            Self::DateTimeOffset => TypeId::DateTimeOffset,
        }
    }

    /// The registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TinyInt => "TinyInt",
            Self::SmallInt => "SmallInt",
            Self::Int => "Int",
            Self::BigInt => "BigInt",
            Self::Real => "Real",
            Self::Float => "Float",
            Self::Bit => "Bit",
            Self::SmallDateTime => "SmallDateTime",
            Self::DateTime => "DateTime",
            Self::SmallMoney => "SmallMoney",
            Self::Money => "Money",
            Self::UniqueIdentifier => "UniqueIdentifier",
            Self::Decimal => "Decimal",
            Self::Numeric => "Numeric",
            Self::Char => "Char",
            Self::VarChar => "VarChar",
            Self::NChar => "NChar",
            Self::NVarChar => "NVarChar",
            Self::Binary => "Binary",
            Self::VarBinary => "VarBinary",
            Self::Text => "Text",
            Self::NText => "NText",
            Self::Image => "Image",
            Self::Xml => "Xml",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::DateTime2 => "DateTime2",
            Self::DateTimeOffset => "DateTimeOffset",
        }
    }

    /// The MS-TDS constant name of the wire type this entry's TYPE_INFO
    /// emits.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt => "INTNTYPE",
            Self::Real | Self::Float => "FLTNTYPE",
            Self::Bit => "BITNTYPE",
            Self::SmallDateTime | Self::DateTime => "DATETIMNTYPE",
            Self::SmallMoney | Self::Money => "MONEYNTYPE",
            Self::UniqueIdentifier => "GUIDTYPE",
            Self::Decimal => "DECIMALNTYPE",
            Self::Numeric => "NUMERICNTYPE",
            Self::Char => "BIGCHARTYPE",
            Self::VarChar => "BIGVARCHRTYPE",
            Self::NChar => "NCHARTYPE",
            Self::NVarChar => "NVARCHARTYPE",
            Self::Binary => "BIGBINARYTYPE",
            Self::VarBinary => "BIGVARBINTYPE",
            Self::Text => "TEXTTYPE",
            Self::NText => "NTEXTTYPE",
            Self::Image => "IMAGETYPE",
            Self::Xml => "XMLTYPE",
            Self::Date => "DATENTYPE",
            Self::Time => "TIMENTYPE",
            Self::DateTime2 => "DATETIME2NTYPE",
            Self::DateTimeOffset => "DATETIMEOFFSETNTYPE",
        }
    }

    /// Fixed value width for types emitted through a nullable wire variant.
    const fn fixed_width(self) -> Option<u8> {
        match self {
            Self::TinyInt | Self::Bit => Some(1),
            Self::SmallInt => Some(2),
            Self::Int | Self::Real | Self::SmallDateTime | Self::SmallMoney => Some(4),
            Self::BigInt | Self::Float | Self::DateTime | Self::Money => Some(8),
            Self::UniqueIdentifier => Some(16),
            _ => None,
        }
    }

    /// The DDL fragment declaring a column of this type.
    #[must_use]
    pub fn declaration(self, spec: &ColumnSpec) -> String {
        let length = |default: &str| {
            spec.length
                .map_or_else(|| default.to_string(), |len| len.to_string())
        };
        match self {
            Self::TinyInt => "tinyint".into(),
            Self::SmallInt => "smallint".into(),
            Self::Int => "int".into(),
            Self::BigInt => "bigint".into(),
            Self::Real => "real".into(),
            Self::Float => "float".into(),
            Self::Bit => "bit".into(),
            Self::SmallDateTime => "smalldatetime".into(),
            Self::DateTime => "datetime".into(),
            Self::SmallMoney => "smallmoney".into(),
            Self::Money => "money".into(),
            Self::UniqueIdentifier => "uniqueidentifier".into(),
            Self::Decimal => format!(
                "decimal({}, {})",
                spec.precision.unwrap_or(18),
                spec.scale.unwrap_or(0)
            ),
            Self::Numeric => format!(
                "numeric({}, {})",
                spec.precision.unwrap_or(18),
                spec.scale.unwrap_or(0)
            ),
            Self::Char => format!("char({})", length("1")),
            Self::VarChar => format!("varchar({})", length("max")),
            Self::NChar => format!("nchar({})", length("1")),
            Self::NVarChar => format!("nvarchar({})", length("max")),
            Self::Binary => format!("binary({})", length("1")),
            Self::VarBinary => format!("varbinary({})", length("max")),
            Self::Text => "text".into(),
            Self::NText => "ntext".into(),
            Self::Image => "image".into(),
            Self::Xml => "xml".into(),
            Self::Date => "date".into(),
            Self::Time => format!("time({})", spec.scale.unwrap_or(7)),
            Self::DateTime2 => format!("datetime2({})", spec.scale.unwrap_or(7)),
            Self::DateTimeOffset => format!("datetimeoffset({})", spec.scale.unwrap_or(7)),
        }
    }

    /// Check if values of this column travel PLP-encoded (`max` types and
    /// XML).
    #[must_use]
    pub fn is_max(self, spec: &ColumnSpec) -> bool {
        match self {
            Self::Xml => true,
            Self::VarChar | Self::NVarChar | Self::VarBinary => {
                spec.length.is_none_or(|len| len >= MAX_LENGTH)
            }
            _ => false,
        }
    }

    /// Emit the TYPE_INFO block for a column of this type.
    ///
    /// Mirrors the metadata decoder's per-type tail format; fixed-width
    /// types emit their nullable wire variant so NULLs can travel as a
    /// zero length.
    pub fn encode_type_info(self, spec: &ColumnSpec, buf: &mut WriteBuffer) {
        match self {
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt => {
                buf.put_u8(TypeId::IntN as u8);
            }
            Self::Real | Self::Float => {
                buf.put_u8(TypeId::FloatN as u8);
            }
            Self::Bit => {
                buf.put_u8(TypeId::BitN as u8);
            }
            Self::SmallDateTime | Self::DateTime => {
                buf.put_u8(TypeId::DateTimeN as u8);
            }
            Self::SmallMoney | Self::Money => {
                buf.put_u8(TypeId::MoneyN as u8);
            }
            Self::UniqueIdentifier => {
                buf.put_u8(TypeId::Guid as u8);
            }
            _ => {
                buf.put_u8(self.id() as u8);
            }
        }

        match self {
            Self::TinyInt
            | Self::SmallInt
            | Self::Int
            | Self::BigInt
            | Self::Real
            | Self::Float
            | Self::Bit
            | Self::SmallDateTime
            | Self::DateTime
            | Self::SmallMoney
            | Self::Money
            | Self::UniqueIdentifier => {
                // fixed_width is total for every arm above
                buf.put_u8(self.fixed_width().unwrap_or(0));
            }

            Self::Decimal | Self::Numeric => {
                let precision = spec.precision.unwrap_or(18);
                buf.put_u8(encode::decimal_byte_length(precision));
                buf.put_u8(precision);
                buf.put_u8(spec.scale.unwrap_or(0));
            }

            Self::Char | Self::VarChar => {
                if self.is_max(spec) {
                    buf.put_u16(MAX_LENGTH as u16);
                } else {
                    buf.put_u16(spec.length.unwrap_or(1) as u16);
                }
                let collation = spec.collation.unwrap_or(Collation::DEFAULT);
                buf.put_slice(&collation.to_bytes());
            }

            Self::NChar | Self::NVarChar => {
                if self.is_max(spec) {
                    buf.put_u16(MAX_LENGTH as u16);
                } else {
                    // Character count doubles into a byte count
                    buf.put_u16((spec.length.unwrap_or(1) * 2) as u16);
                }
                let collation = spec.collation.unwrap_or(Collation::DEFAULT);
                buf.put_slice(&collation.to_bytes());
            }

            Self::Binary | Self::VarBinary => {
                if self.is_max(spec) {
                    buf.put_u16(MAX_LENGTH as u16);
                } else {
                    buf.put_u16(spec.length.unwrap_or(1) as u16);
                }
            }

            Self::Text | Self::NText => {
                buf.put_u32(spec.length.unwrap_or(0x7FFF_FFFF));
                let collation = spec.collation.unwrap_or(Collation::DEFAULT);
                buf.put_slice(&collation.to_bytes());
            }

            Self::Image => {
                buf.put_u32(spec.length.unwrap_or(0x7FFF_FFFF));
            }

            Self::Xml => {
                // No schema collection
                buf.put_u8(0);
            }

            Self::Date => {}

            Self::Time | Self::DateTime2 | Self::DateTimeOffset => {
                buf.put_u8(spec.scale.unwrap_or(7));
            }
        }
    }

    /// Validate and coerce one cell.
    ///
    /// NULL passes through; anything else is coerced to the canonical
    /// [`SqlValue`] variant for this type or rejected with a typed error.
    /// Never panics.
    pub fn validate(self, value: SqlValue) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        match self {
            Self::TinyInt => {
                let v = coerce_i64(&value)?;
                u8::try_from(v)
                    .map(SqlValue::TinyInt)
                    .map_err(|_| TypeError::OutOfRange {
                        target_type: "tinyint",
                    })
            }
            Self::SmallInt => {
                let v = coerce_i64(&value)?;
                i16::try_from(v)
                    .map(SqlValue::SmallInt)
                    .map_err(|_| TypeError::OutOfRange {
                        target_type: "smallint",
                    })
            }
            Self::Int => {
                let v = coerce_i64(&value)?;
                i32::try_from(v)
                    .map(SqlValue::Int)
                    .map_err(|_| TypeError::OutOfRange { target_type: "int" })
            }
            Self::BigInt => Ok(SqlValue::BigInt(coerce_i64(&value)?)),

            Self::Real => Ok(SqlValue::Float(coerce_f64(&value)? as f32)),
            Self::Float => Ok(SqlValue::Double(coerce_f64(&value)?)),

            Self::Bit => coerce_bool(&value).map(SqlValue::Bool),

            Self::SmallDateTime | Self::DateTime | Self::DateTime2 => coerce_datetime(value),

            Self::DateTimeOffset => match value {
                SqlValue::DateTimeOffset(_) => Ok(value),
                SqlValue::DateTime(dt) => Ok(SqlValue::DateTimeOffset(
                    dt.and_utc().fixed_offset(),
                )),
                SqlValue::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
                    .map(SqlValue::DateTimeOffset)
                    .map_err(|_| TypeError::InvalidDate),
                _ => Err(TypeError::InvalidDate),
            },

            Self::Date => match value {
                SqlValue::Date(_) => Ok(value),
                SqlValue::DateTime(dt) => Ok(SqlValue::Date(dt.date())),
                SqlValue::DateTimeOffset(dto) => Ok(SqlValue::Date(dto.date_naive())),
                SqlValue::String(s) => parse_date(&s).map(SqlValue::Date),
                _ => Err(TypeError::InvalidDate),
            },

            Self::Time => match value {
                SqlValue::Time(_) => Ok(value),
                SqlValue::DateTime(dt) => Ok(SqlValue::Time(dt.time())),
                SqlValue::String(s) => parse_time(&s).map(SqlValue::Time),
                _ => Err(TypeError::InvalidTime),
            },

            Self::Decimal | Self::Numeric | Self::Money => {
                coerce_decimal(&value).map(SqlValue::Decimal)
            }
            Self::SmallMoney => {
                let v = coerce_decimal(&value)?;
                let limit = rust_decimal::Decimal::new(214_748_3647, 4);
                if v > limit || v < -limit - rust_decimal::Decimal::new(1, 4) {
                    return Err(TypeError::OutOfRange {
                        target_type: "smallmoney",
                    });
                }
                Ok(SqlValue::Decimal(v))
            }

            Self::Char | Self::VarChar | Self::NChar | Self::NVarChar | Self::Text
            | Self::NText | Self::Xml => match value {
                SqlValue::String(_) => Ok(value),
                _ => Err(TypeError::InvalidString),
            },

            Self::Binary | Self::VarBinary | Self::Image => match value {
                SqlValue::Binary(_) => Ok(value),
                _ => Err(TypeError::InvalidBuffer),
            },

            Self::UniqueIdentifier => match value {
                SqlValue::Uuid(_) => Ok(value),
                SqlValue::String(s) => uuid::Uuid::parse_str(s.trim())
                    .map(SqlValue::Uuid)
                    .map_err(|_| TypeError::InvalidGuid),
                _ => Err(TypeError::InvalidGuid),
            },
        }
    }

    /// Emit the length prefix framing one (validated) value.
    pub fn encode_length_prefix(
        self,
        value: &SqlValue,
        spec: &ColumnSpec,
        options: &EncodeOptions,
    ) -> Result<Bytes, TypeError> {
        let mut buf = BytesMut::new();

        if value.is_null() {
            match self {
                _ if self.is_max(spec) => buf.put_u64_le(PLP_NULL),
                Self::Char | Self::VarChar | Self::NChar | Self::NVarChar | Self::Binary
                | Self::VarBinary => buf.put_u16_le(0xFFFF),
                Self::Text | Self::NText | Self::Image => buf.put_u32_le(0xFFFF_FFFF),
                _ => buf.put_u8(0),
            }
            return Ok(buf.freeze());
        }

        match self {
            _ if self.is_max(spec) => {
                let data_len = self.encode_value_data(value, spec, options)?.total_len() as u64;
                buf.put_u64_le(data_len);
            }
            Self::Char | Self::VarChar | Self::NChar | Self::NVarChar | Self::Binary
            | Self::VarBinary => {
                let data_len = self.encode_value_data(value, spec, options)?.total_len();
                if data_len > 0xFFFE {
                    return Err(TypeError::TooLong {
                        actual: data_len,
                        declared: 0xFFFE,
                    });
                }
                buf.put_u16_le(data_len as u16);
            }
            Self::Text | Self::NText | Self::Image => {
                let data_len = self.encode_value_data(value, spec, options)?.total_len();
                buf.put_u32_le(data_len as u32);
            }
            Self::Decimal | Self::Numeric => {
                buf.put_u8(encode::decimal_byte_length(spec.precision.unwrap_or(18)));
            }
            Self::Time => buf.put_u8(encode::time_byte_length(spec.scale.unwrap_or(7))),
            Self::DateTime2 => {
                buf.put_u8(encode::time_byte_length(spec.scale.unwrap_or(7)) + 3);
            }
            Self::DateTimeOffset => {
                buf.put_u8(encode::time_byte_length(spec.scale.unwrap_or(7)) + 5);
            }
            Self::Date => buf.put_u8(3),
            _ => {
                // fixed_width covers every remaining registered type
                buf.put_u8(self.fixed_width().unwrap_or(0));
            }
        }

        Ok(buf.freeze())
    }

    /// Encode one (validated, non-NULL) value's data bytes as a lazy chunk
    /// sequence. PLP types produce their chunk framing here.
    pub fn encode_value_data(
        self,
        value: &SqlValue,
        spec: &ColumnSpec,
        options: &EncodeOptions,
    ) -> Result<ValueChunks, TypeError> {
        let raw = self.raw_value_bytes(value, spec, options)?;

        if self.is_max(spec) {
            let mut chunks = ValueChunks::empty();
            let mut offset = 0;
            while offset < raw.len() {
                let end = (offset + PLP_CHUNK_SIZE).min(raw.len());
                let mut framed = BytesMut::with_capacity(4);
                framed.put_u32_le((end - offset) as u32);
                chunks.push(framed.freeze());
                chunks.push(raw.slice(offset..end));
                offset = end;
            }
            chunks.push(Bytes::from_static(&[0, 0, 0, 0]));
            return Ok(chunks);
        }

        Ok(ValueChunks::single(raw))
    }

    /// Encode the full wire form of one validated cell: length prefix
    /// followed by the value data.
    pub fn encode_value(
        self,
        value: &SqlValue,
        spec: &ColumnSpec,
        options: &EncodeOptions,
    ) -> Result<ValueChunks, TypeError> {
        let prefix = self.encode_length_prefix(value, spec, options)?;

        if value.is_null() {
            return Ok(ValueChunks::single(prefix));
        }

        let mut chunks = ValueChunks::single(prefix);
        for chunk in self.encode_value_data(value, spec, options)? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// The raw (unframed) bytes of a validated, non-NULL value.
    fn raw_value_bytes(
        self,
        value: &SqlValue,
        spec: &ColumnSpec,
        options: &EncodeOptions,
    ) -> Result<Bytes, TypeError> {
        let mut buf = BytesMut::new();

        match (self, value) {
            (Self::TinyInt, SqlValue::TinyInt(v)) => buf.put_u8(*v),
            (Self::SmallInt, SqlValue::SmallInt(v)) => buf.put_i16_le(*v),
            (Self::Int, SqlValue::Int(v)) => buf.put_i32_le(*v),
            (Self::BigInt, SqlValue::BigInt(v)) => buf.put_i64_le(*v),
            (Self::Real, SqlValue::Float(v)) => buf.put_f32_le(*v),
            (Self::Float, SqlValue::Double(v)) => buf.put_f64_le(*v),
            (Self::Bit, SqlValue::Bool(v)) => buf.put_u8(u8::from(*v)),

            (Self::SmallDateTime, value) => {
                encode::encode_smalldatetime(resolve_datetime(value, options)?, &mut buf);
            }
            (Self::DateTime, value) => {
                encode::encode_datetime(resolve_datetime(value, options)?, &mut buf);
            }
            (Self::DateTime2, value) => {
                encode::encode_datetime2(
                    resolve_datetime(value, options)?,
                    spec.scale.unwrap_or(7),
                    &mut buf,
                );
            }
            (Self::DateTimeOffset, SqlValue::DateTimeOffset(v)) => {
                encode::encode_datetimeoffset(*v, spec.scale.unwrap_or(7), &mut buf);
            }
            (Self::Date, SqlValue::Date(v)) => encode::encode_date(*v, &mut buf),
            (Self::Time, SqlValue::Time(v)) => {
                encode::encode_time(*v, spec.scale.unwrap_or(7), &mut buf);
            }

            (Self::SmallMoney, SqlValue::Decimal(v)) => encode::encode_smallmoney(*v, &mut buf),
            (Self::Money, SqlValue::Decimal(v)) => encode::encode_money(*v, &mut buf),
            (Self::Decimal | Self::Numeric, SqlValue::Decimal(v)) => {
                encode::encode_decimal(
                    *v,
                    spec.precision.unwrap_or(18),
                    spec.scale.unwrap_or(0),
                    &mut buf,
                );
            }

            (Self::UniqueIdentifier, SqlValue::Uuid(v)) => encode::encode_uuid(*v, &mut buf),

            (Self::NChar | Self::NVarChar | Self::NText | Self::Xml, SqlValue::String(s)) => {
                for unit in s.encode_utf16() {
                    buf.put_u16_le(unit);
                }
            }
            (Self::Char | Self::VarChar | Self::Text, SqlValue::String(s)) => {
                buf.put_slice(s.as_bytes());
            }

            (Self::Binary | Self::VarBinary | Self::Image, SqlValue::Binary(b)) => {
                buf.put_slice(b);
            }

            (_, value) => {
                return Err(TypeError::UnsupportedConversion {
                    from: value.type_name(),
                    to: self.name(),
                });
            }
        }

        Ok(buf.freeze())
    }
}

fn coerce_i64(value: &SqlValue) -> Result<i64, TypeError> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    match value {
        SqlValue::Double(v) if v.is_finite() => Ok(*v as i64),
        SqlValue::Float(v) if v.is_finite() => Ok(f64::from(*v) as i64),
        SqlValue::String(s) => s.trim().parse().map_err(|_| TypeError::InvalidNumber),
        _ => Err(TypeError::InvalidNumber),
    }
}

fn coerce_f64(value: &SqlValue) -> Result<f64, TypeError> {
    if let Some(v) = value.as_f64() {
        return Ok(v);
    }
    if let Some(v) = value.as_i64() {
        return Ok(v as f64);
    }
    match value {
        SqlValue::String(s) => s.trim().parse().map_err(|_| TypeError::InvalidNumber),
        SqlValue::Decimal(d) => {
            use rust_decimal::prelude::ToPrimitive;
            d.to_f64().ok_or(TypeError::InvalidNumber)
        }
        _ => Err(TypeError::InvalidNumber),
    }
}

fn coerce_bool(value: &SqlValue) -> Result<bool, TypeError> {
    match value {
        SqlValue::Bool(v) => Ok(*v),
        _ => {
            if let Some(v) = value.as_i64() {
                return Ok(v != 0);
            }
            match value {
                SqlValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(TypeError::InvalidBoolean),
                },
                _ => Err(TypeError::InvalidBoolean),
            }
        }
    }
}

fn coerce_decimal(value: &SqlValue) -> Result<rust_decimal::Decimal, TypeError> {
    match value {
        SqlValue::Decimal(v) => Ok(*v),
        SqlValue::Double(v) => {
            rust_decimal::Decimal::from_f64_retain(*v).ok_or(TypeError::InvalidNumber)
        }
        SqlValue::Float(v) => rust_decimal::Decimal::from_f64_retain(f64::from(*v))
            .ok_or(TypeError::InvalidNumber),
        SqlValue::String(s) => s.trim().parse().map_err(|_| TypeError::InvalidNumber),
        _ => {
            let v = value.as_i64().ok_or(TypeError::InvalidNumber)?;
            Ok(rust_decimal::Decimal::from(v))
        }
    }
}

fn coerce_datetime(value: SqlValue) -> Result<SqlValue, TypeError> {
    match value {
        SqlValue::DateTime(_) | SqlValue::DateTimeOffset(_) => Ok(value),
        SqlValue::Date(d) => Ok(SqlValue::DateTime(
            d.and_hms_opt(0, 0, 0).ok_or(TypeError::InvalidDate)?,
        )),
        SqlValue::String(s) => parse_datetime(&s).map(SqlValue::DateTime),
        _ => Err(TypeError::InvalidDate),
    }
}

/// Resolve a datetime-family value to wall-clock fields, applying the
/// UTC/local choice for instant-bearing values.
fn resolve_datetime(
    value: &SqlValue,
    options: &EncodeOptions,
) -> Result<chrono::NaiveDateTime, TypeError> {
    match value {
        SqlValue::DateTime(dt) => Ok(*dt),
        SqlValue::DateTimeOffset(dto) => {
            if options.use_utc {
                Ok(dto.with_timezone(&Utc).naive_utc())
            } else {
                Ok(dto.with_timezone(&Local).naive_local())
            }
        }
        _ => Err(TypeError::InvalidDate),
    }
}

fn parse_date(s: &str) -> Result<chrono::NaiveDate, TypeError> {
    let s = s.trim();
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| parse_datetime(s).map(|dt| dt.date()))
        .map_err(|_| TypeError::InvalidDate)
}

fn parse_time(s: &str) -> Result<chrono::NaiveTime, TypeError> {
    let s = s.trim();
    chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| TypeError::InvalidTime)
}

fn parse_datetime(s: &str) -> Result<chrono::NaiveDateTime, TypeError> {
    let s = s.trim();
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| TypeError::InvalidDate)
}
