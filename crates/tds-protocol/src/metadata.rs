//! COLMETADATA decoding and column-driven row value extraction.
//!
//! The decoders here follow the incremental convention used throughout the
//! crate: `Ok(None)` means the buffer holds an incomplete structure and the
//! caller should retry with more bytes; `Err` means the stream is corrupt.

use bytes::{Buf, Bytes};

use crate::codec::{read_b_varchar, read_u8, read_u16, read_u32, read_u64, read_us_varchar};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, TypeId, TypeTail};
use crate::version::TdsVersion;

/// Column count marker meaning "no columns follow".
pub const NO_COLUMNS: u16 = 0xFFFF;

/// Data length marker selecting PLP (`max`) encoding.
pub const MAX_LENGTH: u32 = 0xFFFF;

/// PLP total length marker for NULL.
const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// XML schema collection reference from column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSchema {
    /// Database holding the schema collection.
    pub db_name: String,
    /// Owning schema.
    pub owning_schema: String,
    /// Schema collection name.
    pub collection: String,
}

/// UDT naming block from column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdtInfo {
    /// Maximum serialized size in bytes.
    pub max_byte_size: u16,
    /// Database holding the type.
    pub db_name: String,
    /// Owning schema.
    pub owning_schema: String,
    /// Type name.
    pub type_name: String,
    /// Fully qualified assembly name.
    pub assembly_name: String,
}

/// One column descriptor from COLMETADATA.
///
/// Immutable for the lifetime of a request once decoded.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    /// User type id (`u16` before TDS 7.2, `u32` after).
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Data type.
    pub type_id: TypeId,
    /// Declared maximum data length, for length-prefixed types.
    pub data_length: Option<u32>,
    /// Precision, for numeric types.
    pub precision: Option<u8>,
    /// Scale, for numeric and scaled time types.
    pub scale: Option<u8>,
    /// Collation, for character types.
    pub collation: Option<Collation>,
    /// XML schema collection, for typed XML columns.
    pub xml_schema: Option<XmlSchema>,
    /// UDT naming block, for UDT columns.
    pub udt_info: Option<UdtInfo>,
    /// Column name.
    pub name: String,
}

impl ColumnMetadata {
    /// Check if a `max`-typed column (PLP encoding on the wire).
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.type_id.supports_plp()
            && (self.data_length == Some(MAX_LENGTH) || self.type_id == TypeId::Xml
                || self.type_id == TypeId::Udt)
    }
}

/// Decoded COLMETADATA token payload.
#[derive(Debug, Clone, Default)]
pub struct ColMetaData {
    /// Column descriptors in result order.
    pub columns: Vec<ColumnMetadata>,
}

impl ColMetaData {
    /// Decode a COLMETADATA payload (the token tag already consumed).
    pub fn decode(
        src: &mut impl Buf,
        version: TdsVersion,
    ) -> Result<Option<Self>, ProtocolError> {
        let Some(count) = read_u16(src) else {
            return Ok(None);
        };

        if count == NO_COLUMNS {
            return Ok(Some(Self::default()));
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match decode_column(src, version)? {
                Some(column) => columns.push(column),
                None => return Ok(None),
            }
        }

        Ok(Some(Self { columns }))
    }
}

fn decode_column(
    src: &mut impl Buf,
    version: TdsVersion,
) -> Result<Option<ColumnMetadata>, ProtocolError> {
    let user_type = if version.has_u32_user_type() {
        match read_u32(src) {
            Some(v) => v,
            None => return Ok(None),
        }
    } else {
        match read_u16(src) {
            Some(v) => u32::from(v),
            None => return Ok(None),
        }
    };

    let Some(flag_bits) = read_u16(src) else {
        return Ok(None);
    };
    let Some(type_byte) = read_u8(src) else {
        return Ok(None);
    };
    let type_id = TypeId::from_u8(type_byte).ok_or(ProtocolError::UnknownType(type_byte))?;

    let mut column = ColumnMetadata {
        user_type,
        flags: ColumnFlags::from_wire(flag_bits),
        type_id,
        data_length: None,
        precision: None,
        scale: None,
        collation: None,
        xml_schema: None,
        udt_info: None,
        name: String::new(),
    };

    match type_id.tail() {
        TypeTail::Fixed => {}
        TypeTail::ByteLength => {
            let Some(len) = read_u8(src) else {
                return Ok(None);
            };
            column.data_length = Some(u32::from(len));
        }
        TypeTail::UshortLength => {
            let Some(len) = read_u16(src) else {
                return Ok(None);
            };
            column.data_length = Some(u32::from(len));
        }
        TypeTail::UshortLengthCollation => {
            let Some(len) = read_u16(src) else {
                return Ok(None);
            };
            let Some(collation) = Collation::decode(src) else {
                return Ok(None);
            };
            column.data_length = Some(u32::from(len));
            column.collation = Some(collation);
        }
        TypeTail::LongLength => {
            let Some(len) = read_u32(src) else {
                return Ok(None);
            };
            column.data_length = Some(len);
        }
        TypeTail::LongLengthCollation => {
            let Some(len) = read_u32(src) else {
                return Ok(None);
            };
            let Some(collation) = Collation::decode(src) else {
                return Ok(None);
            };
            column.data_length = Some(len);
            column.collation = Some(collation);
        }
        TypeTail::Scale => {
            let Some(scale) = read_u8(src) else {
                return Ok(None);
            };
            column.scale = Some(scale);
        }
        TypeTail::PrecisionScale => {
            let Some(len) = read_u8(src) else {
                return Ok(None);
            };
            let Some(precision) = read_u8(src) else {
                return Ok(None);
            };
            let Some(scale) = read_u8(src) else {
                return Ok(None);
            };
            column.data_length = Some(u32::from(len));
            column.precision = Some(precision);
            column.scale = Some(scale);
        }
        TypeTail::XmlSchema => {
            let Some(present) = read_u8(src) else {
                return Ok(None);
            };
            if present == 1 {
                let Some(db_name) = read_b_varchar(src) else {
                    return Ok(None);
                };
                let Some(owning_schema) = read_b_varchar(src) else {
                    return Ok(None);
                };
                let Some(collection) = read_us_varchar(src) else {
                    return Ok(None);
                };
                column.xml_schema = Some(XmlSchema {
                    db_name,
                    owning_schema,
                    collection,
                });
            }
        }
        TypeTail::Udt => {
            let Some(max_byte_size) = read_u16(src) else {
                return Ok(None);
            };
            let Some(db_name) = read_b_varchar(src) else {
                return Ok(None);
            };
            let Some(owning_schema) = read_b_varchar(src) else {
                return Ok(None);
            };
            let Some(type_name) = read_b_varchar(src) else {
                return Ok(None);
            };
            let Some(assembly_name) = read_us_varchar(src) else {
                return Ok(None);
            };
            column.udt_info = Some(UdtInfo {
                max_byte_size,
                db_name,
                owning_schema,
                type_name,
                assembly_name,
            });
        }
    }

    let Some(name) = read_b_varchar(src) else {
        return Ok(None);
    };
    column.name = name;

    Ok(Some(column))
}

/// Raw value bytes for one row, aligned with the column descriptors.
///
/// `None` cells are SQL NULL. Values are captured verbatim; projection into
/// typed values is the caller's concern.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// Per-column raw value bytes.
    pub values: Vec<Option<Bytes>>,
}

/// Read a ROW payload (tag already consumed) described by `columns`.
pub fn read_row(
    src: &mut impl Buf,
    columns: &[ColumnMetadata],
) -> Result<Option<RawRow>, ProtocolError> {
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        match read_value(src, column)? {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(RawRow { values }))
}

/// Read an NBCROW payload: a null bitmap followed by values for columns the
/// bitmap does not mark NULL.
pub fn read_nbc_row(
    src: &mut impl Buf,
    columns: &[ColumnMetadata],
) -> Result<Option<RawRow>, ProtocolError> {
    let bitmap_len = columns.len().div_ceil(8);
    if src.remaining() < bitmap_len {
        return Ok(None);
    }
    let mut bitmap = vec![0u8; bitmap_len];
    src.copy_to_slice(&mut bitmap);

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            values.push(None);
            continue;
        }
        match read_value(src, column)? {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(RawRow { values }))
}

/// Read one value's raw bytes according to the column's wire layout.
///
/// Returns `Ok(None)` for "need more bytes", `Ok(Some(None))` for SQL NULL.
#[allow(clippy::option_option)]
fn read_value(
    src: &mut impl Buf,
    column: &ColumnMetadata,
) -> Result<Option<Option<Bytes>>, ProtocolError> {
    if column.is_plp() {
        return read_plp_value(src);
    }

    if let Some(size) = column.type_id.fixed_size() {
        if src.remaining() < size {
            return Ok(None);
        }
        return Ok(Some(Some(src.copy_to_bytes(size))));
    }

    if column.type_id.has_byte_length_values() {
        let Some(len) = read_u8(src) else {
            return Ok(None);
        };
        if len == 0 {
            return Ok(Some(None));
        }
        if src.remaining() < len as usize {
            return Ok(None);
        }
        return Ok(Some(Some(src.copy_to_bytes(len as usize))));
    }

    match column.type_id.tail() {
        TypeTail::UshortLength | TypeTail::UshortLengthCollation => {
            let Some(len) = read_u16(src) else {
                return Ok(None);
            };
            if len == 0xFFFF {
                return Ok(Some(None));
            }
            if src.remaining() < len as usize {
                return Ok(None);
            }
            Ok(Some(Some(src.copy_to_bytes(len as usize))))
        }
        // VARIANT carries a plain 4-byte length; zero is NULL.
        TypeTail::LongLength if column.type_id == TypeId::Variant => {
            let Some(len) = read_u32(src) else {
                return Ok(None);
            };
            if len == 0 {
                return Ok(Some(None));
            }
            if src.remaining() < len as usize {
                return Ok(None);
            }
            Ok(Some(Some(src.copy_to_bytes(len as usize))))
        }
        TypeTail::LongLength | TypeTail::LongLengthCollation => read_long_value(src),
        _ => Err(ProtocolError::UnknownType(column.type_id as u8)),
    }
}

/// Read a TEXT/NTEXT/IMAGE/VARIANT value: text pointer, timestamp, then a
/// 4-byte length-prefixed payload. A zero-length text pointer is NULL.
#[allow(clippy::option_option)]
fn read_long_value(src: &mut impl Buf) -> Result<Option<Option<Bytes>>, ProtocolError> {
    let Some(ptr_len) = read_u8(src) else {
        return Ok(None);
    };
    if ptr_len == 0 {
        return Ok(Some(None));
    }
    // Text pointer plus 8-byte timestamp; neither is surfaced.
    if src.remaining() < ptr_len as usize + 8 {
        return Ok(None);
    }
    src.advance(ptr_len as usize + 8);

    let Some(len) = read_u32(src) else {
        return Ok(None);
    };
    if len == 0xFFFF_FFFF {
        return Ok(Some(None));
    }
    if src.remaining() < len as usize {
        return Ok(None);
    }
    Ok(Some(Some(src.copy_to_bytes(len as usize))))
}

/// Read a PLP (partially length-prefixed) value: 8-byte total length, then
/// 4-byte length-prefixed chunks terminated by a zero-length chunk.
#[allow(clippy::option_option)]
fn read_plp_value(src: &mut impl Buf) -> Result<Option<Option<Bytes>>, ProtocolError> {
    let Some(total) = read_u64(src) else {
        return Ok(None);
    };
    if total == PLP_NULL {
        return Ok(Some(None));
    }

    let mut data = Vec::new();
    loop {
        let Some(chunk_len) = read_u32(src) else {
            return Ok(None);
        };
        if chunk_len == 0 {
            break;
        }
        if src.remaining() < chunk_len as usize {
            return Ok(None);
        }
        data.extend_from_slice(&src.copy_to_bytes(chunk_len as usize));
    }

    Ok(Some(Some(Bytes::from(data))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::WriteBuffer;

    fn encode_int_column(buf: &mut WriteBuffer, user_type: u32, flags: u16, name: &str) {
        buf.put_u32(user_type);
        buf.put_u16(flags);
        buf.put_u8(TypeId::Int4 as u8);
        buf.put_b_varchar(name);
    }

    #[test]
    fn test_decode_int_columns() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(2);
        encode_int_column(&mut buf, 0, 0x0001, "id");
        encode_int_column(&mut buf, 0, 0x0000, "total");

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
            .unwrap()
            .unwrap();

        assert_eq!(meta.columns.len(), 2);
        assert_eq!(meta.columns[0].name, "id");
        assert!(meta.columns[0].flags.is_nullable());
        assert_eq!(meta.columns[1].name, "total");
        assert_eq!(meta.columns[1].type_id, TypeId::Int4);
    }

    #[test]
    fn test_decode_large_column_set() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(1024);
        for _ in 0..1024 {
            encode_int_column(&mut buf, 2, 3, "name");
        }

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
            .unwrap()
            .unwrap();

        assert_eq!(meta.columns.len(), 1024);
        for column in &meta.columns {
            assert_eq!(column.user_type, 2);
            assert_eq!(column.flags.bits(), 3);
            assert_eq!(column.name, "name");
        }
    }

    #[test]
    fn test_no_columns_marker() {
        let raw = [0xFF, 0xFF];
        let mut cursor = &raw[..];
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
            .unwrap()
            .unwrap();
        assert!(meta.columns.is_empty());
    }

    #[test]
    fn test_user_type_width_by_version() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(1);
        buf.put_u16(7); // u16 userType on TDS 7.1
        buf.put_u16(0);
        buf.put_u8(TypeId::Int4 as u8);
        buf.put_b_varchar("n");

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_1)
            .unwrap()
            .unwrap();
        assert_eq!(meta.columns[0].user_type, 7);
    }

    #[test]
    fn test_decode_nvarchar_with_collation() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(1);
        buf.put_u32(0);
        buf.put_u16(0x0001);
        buf.put_u8(TypeId::NVarChar as u8);
        buf.put_u16(200);
        buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        buf.put_b_varchar("title");

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
            .unwrap()
            .unwrap();

        let column = &meta.columns[0];
        assert_eq!(column.data_length, Some(200));
        let collation = column.collation.unwrap();
        assert_eq!(collation.lcid, 0x0409);
        assert_eq!(collation.sort_id, 52);
        assert_eq!(column.name, "title");
    }

    #[test]
    fn test_decode_numeric_tail() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(1);
        buf.put_u32(0);
        buf.put_u16(0x0001);
        buf.put_u8(TypeId::NumericN as u8);
        buf.put_u8(9);
        buf.put_u8(18);
        buf.put_u8(2);
        buf.put_b_varchar("price");

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let meta = ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
            .unwrap()
            .unwrap();

        let column = &meta.columns[0];
        assert_eq!(column.data_length, Some(9));
        assert_eq!(column.precision, Some(18));
        assert_eq!(column.scale, Some(2));
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(1);
        buf.put_u32(0);
        buf.put_u16(0);
        buf.put_u8(0x99);

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        assert!(matches!(
            ColMetaData::decode(&mut cursor, TdsVersion::V7_4),
            Err(ProtocolError::UnknownType(0x99))
        ));
    }

    #[test]
    fn test_truncated_metadata_needs_more() {
        let mut buf = WriteBuffer::new();
        buf.put_u16(2);
        encode_int_column(&mut buf, 0, 0, "id");
        // Second column missing entirely.

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        assert!(
            ColMetaData::decode(&mut cursor, TdsVersion::V7_4)
                .unwrap()
                .is_none()
        );
    }

    fn int_column(name: &str) -> ColumnMetadata {
        ColumnMetadata {
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_id: TypeId::Int4,
            data_length: None,
            precision: None,
            scale: None,
            collation: None,
            xml_schema: None,
            udt_info: None,
            name: name.to_string(),
        }
    }

    fn intn_column(name: &str) -> ColumnMetadata {
        ColumnMetadata {
            type_id: TypeId::IntN,
            data_length: Some(4),
            ..int_column(name)
        }
    }

    #[test]
    fn test_read_row_fixed_and_nullable() {
        let columns = vec![int_column("a"), intn_column("b")];

        // a = 7 (fixed int), b = NULL (zero length prefix)
        let raw = [7u8, 0, 0, 0, 0];
        let mut cursor = &raw[..];
        let row = read_row(&mut cursor, &columns).unwrap().unwrap();

        assert_eq!(row.values[0].as_deref(), Some(&[7u8, 0, 0, 0][..]));
        assert!(row.values[1].is_none());
    }

    #[test]
    fn test_read_row_needs_more() {
        let columns = vec![int_column("a")];
        let raw = [7u8, 0];
        let mut cursor = &raw[..];
        assert!(read_row(&mut cursor, &columns).unwrap().is_none());
    }

    #[test]
    fn test_read_nbc_row() {
        let columns = vec![int_column("a"), intn_column("b"), int_column("c")];

        // Bitmap marks column b (bit 1) NULL; values follow for a and c.
        let raw = [0b0000_0010u8, 1, 0, 0, 0, 2, 0, 0, 0];
        let mut cursor = &raw[..];
        let row = read_nbc_row(&mut cursor, &columns).unwrap().unwrap();

        assert_eq!(row.values[0].as_deref(), Some(&[1u8, 0, 0, 0][..]));
        assert!(row.values[1].is_none());
        assert_eq!(row.values[2].as_deref(), Some(&[2u8, 0, 0, 0][..]));
    }

    #[test]
    fn test_read_plp_value_chunks() {
        let mut column = int_column("blob");
        column.type_id = TypeId::NVarChar;
        column.data_length = Some(MAX_LENGTH);

        let mut buf = WriteBuffer::new();
        buf.put_u64(4); // total length
        buf.put_u32(2);
        buf.put_slice(&[0xAA, 0xBB]);
        buf.put_u32(2);
        buf.put_slice(&[0xCC, 0xDD]);
        buf.put_u32(0); // terminator

        let bytes = buf.take();
        let mut cursor = bytes.as_ref();
        let row = read_row(&mut cursor, std::slice::from_ref(&column))
            .unwrap()
            .unwrap();
        assert_eq!(
            row.values[0].as_deref(),
            Some(&[0xAAu8, 0xBB, 0xCC, 0xDD][..])
        );
    }
}
