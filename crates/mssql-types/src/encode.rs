//! TDS binary encoding for SQL values.
//!
//! Low-level encoders shared by the type registry. Date-family types come
//! in two epochs: DATETIME/SMALLDATETIME count from 1900-01-01, the
//! SQL Server 2008 types (DATE, DATETIME2, DATETIMEOFFSET) count from
//! 0001-01-01.

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Base date for DATETIME and SMALLDATETIME.
fn epoch_1900() -> NaiveDate {
    // Constructed from constants, always valid
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

/// Base date for DATE, DATETIME2, DATETIMEOFFSET.
fn epoch_0001() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default()
}

/// Encode a SMALLDATETIME: days since 1900-01-01 (`u16`), then minutes
/// since midnight (`u16`), seconds rounded to the nearest minute.
pub fn encode_smalldatetime(value: NaiveDateTime, buf: &mut BytesMut) {
    let days = value.date().signed_duration_since(epoch_1900()).num_days() as u16;
    let mut minutes = (value.hour() * 60 + value.minute()) as u16;
    if value.second() >= 30 {
        minutes += 1;
    }
    buf.put_u16_le(days);
    buf.put_u16_le(minutes);
}

/// Encode a DATETIME: days since 1900-01-01 (`i32`), then three-hundredths
/// of a second since midnight (`u32`).
pub fn encode_datetime(value: NaiveDateTime, buf: &mut BytesMut) {
    let days = value.date().signed_duration_since(epoch_1900()).num_days() as i32;
    let seconds = u64::from(value.num_seconds_from_midnight());
    let subsecond = u64::from(value.nanosecond()) * 300 / 1_000_000_000;
    let three_hundredths = (seconds * 300 + subsecond) as u32;
    buf.put_i32_le(days);
    buf.put_u32_le(three_hundredths);
}

/// Encode a DATE: days since 0001-01-01 as 3 little-endian bytes.
pub fn encode_date(value: NaiveDate, buf: &mut BytesMut) {
    let days = value.signed_duration_since(epoch_0001()).num_days() as u32;
    buf.put_u8((days & 0xFF) as u8);
    buf.put_u8(((days >> 8) & 0xFF) as u8);
    buf.put_u8(((days >> 16) & 0xFF) as u8);
}

/// Byte length of a TIME value at the given scale.
#[must_use]
pub const fn time_byte_length(scale: u8) -> u8 {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// Units per second at the given scale (10^scale).
const fn time_units_per_second(scale: u8) -> u64 {
    let mut units = 1u64;
    let mut i = 0;
    while i < scale {
        units *= 10;
        i += 1;
    }
    units
}

/// Encode a TIME: 10^(-scale) second units since midnight, in
/// [`time_byte_length`] little-endian bytes.
pub fn encode_time(value: NaiveTime, scale: u8, buf: &mut BytesMut) {
    let scale = scale.min(7);
    let nanos = u64::from(value.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(value.nanosecond());
    let units = nanos / (1_000_000_000 / time_units_per_second(scale));

    for i in 0..time_byte_length(scale) {
        buf.put_u8(((units >> (i * 8)) & 0xFF) as u8);
    }
}

/// Encode a DATETIME2: TIME at the given scale, then DATE.
pub fn encode_datetime2(value: NaiveDateTime, scale: u8, buf: &mut BytesMut) {
    encode_time(value.time(), scale, buf);
    encode_date(value.date(), buf);
}

/// Encode a DATETIMEOFFSET: the UTC time as DATETIME2, then the offset in
/// minutes (`i16`).
pub fn encode_datetimeoffset(
    value: chrono::DateTime<chrono::FixedOffset>,
    scale: u8,
    buf: &mut BytesMut,
) {
    let utc = value.naive_utc();
    encode_time(utc.time(), scale, buf);
    encode_date(utc.date(), buf);

    let offset_minutes = (value.offset().local_minus_utc() / 60) as i16;
    buf.put_i16_le(offset_minutes);
}

/// Encode a GUID in SQL Server's mixed-endian layout: the first three
/// groups little-endian, the last eight bytes as-is.
pub fn encode_uuid(value: uuid::Uuid, buf: &mut BytesMut) {
    let bytes = value.as_bytes();

    buf.put_u8(bytes[3]);
    buf.put_u8(bytes[2]);
    buf.put_u8(bytes[1]);
    buf.put_u8(bytes[0]);

    buf.put_u8(bytes[5]);
    buf.put_u8(bytes[4]);

    buf.put_u8(bytes[7]);
    buf.put_u8(bytes[6]);

    buf.put_slice(&bytes[8..16]);
}

/// Byte length of a DECIMAL/NUMERIC value at the given precision,
/// including the sign byte.
#[must_use]
pub const fn decimal_byte_length(precision: u8) -> u8 {
    match precision {
        1..=9 => 5,
        10..=19 => 9,
        20..=28 => 13,
        _ => 17,
    }
}

/// Encode a DECIMAL/NUMERIC value: sign byte (1 = positive), then the
/// mantissa rescaled to `scale` as a little-endian integer of
/// `decimal_byte_length(precision) - 1` bytes.
pub fn encode_decimal(value: rust_decimal::Decimal, precision: u8, scale: u8, buf: &mut BytesMut) {
    let mut rescaled = value;
    rescaled.rescale(u32::from(scale));

    buf.put_u8(u8::from(!rescaled.is_sign_negative()));

    let mantissa = rescaled.mantissa().unsigned_abs().to_le_bytes();
    let width = decimal_byte_length(precision) as usize - 1;
    buf.put_slice(&mantissa[..width.min(mantissa.len())]);
}

/// Encode a MONEY value: the amount times 10^4 as `i64`, written high
/// 32 bits first.
pub fn encode_money(value: rust_decimal::Decimal, buf: &mut BytesMut) {
    let mut rescaled = value;
    rescaled.rescale(4);
    let units = rescaled.mantissa() as i64;
    buf.put_i32_le((units >> 32) as i32);
    buf.put_u32_le((units & 0xFFFF_FFFF) as u32);
}

/// Encode a SMALLMONEY value: the amount times 10^4 as `i32`.
pub fn encode_smallmoney(value: rust_decimal::Decimal, buf: &mut BytesMut) {
    let mut rescaled = value;
    rescaled.rescale(4);
    buf.put_i32_le(rescaled.mantissa() as i32);
}
