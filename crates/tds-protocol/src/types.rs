//! TDS data type identifiers and their wire classification.
//!
//! Each type id determines how its COLMETADATA tail and row values are laid
//! out; [`TypeId::tail`] encodes the decode table used by the metadata
//! decoder.

use bitflags::bitflags;

/// TDS data type identifiers.
///
/// These correspond to the type bytes sent in column metadata and bulk-load
/// column descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer (TINYINT).
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer (SMALLINT).
    Int2 = 0x34,
    /// 32-bit signed integer (INT).
    Int4 = 0x38,
    /// 64-bit signed integer (BIGINT).
    Int8 = 0x7F,
    /// 32-bit floating point (REAL).
    Float4 = 0x3B,
    /// 64-bit floating point (FLOAT).
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money (SMALLMONEY).
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte datetime (SMALLDATETIME).
    DateTime4 = 0x3A,
    /// Date (3 bytes, SQL Server 2008+).
    Date = 0x28,

    /// Nullable variable-length integer.
    IntN = 0x26,
    /// Nullable variable-length float.
    FloatN = 0x6D,
    /// Nullable variable-length money.
    MoneyN = 0x6E,
    /// Nullable bit.
    BitN = 0x68,
    /// GUID (UNIQUEIDENTIFIER).
    Guid = 0x24,
    /// Nullable variable-length datetime.
    DateTimeN = 0x6F,

    /// Nullable decimal.
    DecimalN = 0x6A,
    /// Nullable numeric.
    NumericN = 0x6C,

    /// Time with variable precision.
    Time = 0x29,
    /// DateTime2 with variable precision.
    DateTime2 = 0x2A,
    /// DateTimeOffset with variable precision.
    DateTimeOffset = 0x2B,

    /// Variable-length character with 2-byte length.
    BigVarChar = 0xA7,
    /// Fixed-length character with 2-byte length.
    BigChar = 0xAF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,
    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length binary with 2-byte length.
    BigVarBinary = 0xA5,
    /// Fixed-length binary with 2-byte length.
    BigBinary = 0xAD,

    /// Text (deprecated, use varchar(max)).
    Text = 0x23,
    /// NText (deprecated, use nvarchar(max)).
    NText = 0x63,
    /// Image (deprecated, use varbinary(max)).
    Image = 0x22,

    /// SQL Variant.
    Variant = 0x62,
    /// User-defined type.
    Udt = 0xF0,
    /// XML type.
    Xml = 0xF1,
}

/// Shape of the per-type tail inside COLMETADATA, after `userType`,
/// `flags`, and the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTail {
    /// No tail; the length is implied by the type.
    Fixed,
    /// `u8` data length.
    ByteLength,
    /// `u16` data length.
    UshortLength,
    /// `u16` data length followed by a 5-byte collation.
    UshortLengthCollation,
    /// `u32` data length.
    LongLength,
    /// `u32` data length followed by a 5-byte collation.
    LongLengthCollation,
    /// `u8` scale.
    Scale,
    /// `u8` data length, `u8` precision, `u8` scale.
    PrecisionScale,
    /// Optional XML schema collection reference.
    XmlSchema,
    /// UDT max byte size and type naming block.
    Udt,
}

impl TypeId {
    /// Create a type id from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x1F => Some(Self::Null),
            0x30 => Some(Self::Int1),
            0x32 => Some(Self::Bit),
            0x34 => Some(Self::Int2),
            0x38 => Some(Self::Int4),
            0x7F => Some(Self::Int8),
            0x3B => Some(Self::Float4),
            0x3E => Some(Self::Float8),
            0x3C => Some(Self::Money),
            0x7A => Some(Self::Money4),
            0x3D => Some(Self::DateTime),
            0x3A => Some(Self::DateTime4),
            0x28 => Some(Self::Date),
            0x26 => Some(Self::IntN),
            0x6D => Some(Self::FloatN),
            0x6E => Some(Self::MoneyN),
            0x68 => Some(Self::BitN),
            0x24 => Some(Self::Guid),
            0x6F => Some(Self::DateTimeN),
            0x6A => Some(Self::DecimalN),
            0x6C => Some(Self::NumericN),
            0x29 => Some(Self::Time),
            0x2A => Some(Self::DateTime2),
            0x2B => Some(Self::DateTimeOffset),
            0xA7 => Some(Self::BigVarChar),
            0xAF => Some(Self::BigChar),
            0xE7 => Some(Self::NVarChar),
            0xEF => Some(Self::NChar),
            0xA5 => Some(Self::BigVarBinary),
            0xAD => Some(Self::BigBinary),
            0x23 => Some(Self::Text),
            0x63 => Some(Self::NText),
            0x22 => Some(Self::Image),
            0x62 => Some(Self::Variant),
            0xF0 => Some(Self::Udt),
            0xF1 => Some(Self::Xml),
            _ => None,
        }
    }

    /// Classify the COLMETADATA tail for this type.
    #[must_use]
    pub const fn tail(self) -> TypeTail {
        match self {
            Self::Null
            | Self::Int1
            | Self::Bit
            | Self::Int2
            | Self::Int4
            | Self::Int8
            | Self::Float4
            | Self::Float8
            | Self::Money
            | Self::Money4
            | Self::DateTime
            | Self::DateTime4
            | Self::Date => TypeTail::Fixed,

            Self::IntN | Self::FloatN | Self::MoneyN | Self::BitN | Self::Guid
            | Self::DateTimeN => TypeTail::ByteLength,

            Self::Variant => TypeTail::LongLength,

            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar => {
                TypeTail::UshortLengthCollation
            }

            Self::Text | Self::NText => TypeTail::LongLengthCollation,

            Self::BigVarBinary | Self::BigBinary => TypeTail::UshortLength,

            Self::Image => TypeTail::LongLength,

            Self::Xml => TypeTail::XmlSchema,

            Self::Time | Self::DateTime2 | Self::DateTimeOffset => TypeTail::Scale,

            Self::DecimalN | Self::NumericN => TypeTail::PrecisionScale,

            Self::Udt => TypeTail::Udt,
        }
    }

    /// Get the fixed value size in bytes, if the type has one.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            Self::Date => Some(3),
            _ => None,
        }
    }

    /// Check if row values of this type carry a 1-byte length prefix.
    #[must_use]
    pub const fn has_byte_length_values(self) -> bool {
        matches!(
            self,
            Self::IntN
                | Self::FloatN
                | Self::MoneyN
                | Self::BitN
                | Self::Guid
                | Self::DateTimeN
                | Self::DecimalN
                | Self::NumericN
                | Self::Time
                | Self::DateTime2
                | Self::DateTimeOffset
        )
    }

    /// Check if this is a Unicode character type.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if a `0xFFFF` data length selects PLP (`max`) encoding for
    /// this type.
    #[must_use]
    pub const fn supports_plp(self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::NVarChar | Self::BigVarBinary | Self::Xml | Self::Udt
        )
    }
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column is nullable.
        const NULLABLE = 0x0001;
        /// Column uses case-sensitive comparison.
        const CASE_SENSITIVE = 0x0002;
        /// Column is writable (low bit of the 2-bit updateable field).
        const UPDATEABLE = 0x0004;
        /// Column is an identity column.
        const IDENTITY = 0x0010;
        /// Column is computed.
        const COMPUTED = 0x0020;
        /// Column has a fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Column is part of a sparse column set.
        const SPARSE_COLUMN_SET = 0x0200;
        /// Column is encrypted (Always Encrypted).
        const ENCRYPTED = 0x0400;
        /// Column is hidden.
        const HIDDEN = 0x2000;
        /// Column is a key column.
        const KEY = 0x4000;
        /// Nullability unknown at query time.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}

impl ColumnFlags {
    /// Parse flags from the wire, preserving bits this driver does not
    /// interpret.
    #[must_use]
    pub fn from_wire(bits: u16) -> Self {
        Self::from_bits_retain(bits)
    }

    /// Check nullability.
    #[must_use]
    pub fn is_nullable(self) -> bool {
        self.contains(Self::NULLABLE)
    }
}
