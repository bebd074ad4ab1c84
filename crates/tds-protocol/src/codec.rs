//! Codec utilities for TDS protocol encoding and decoding.
//!
//! The readers in this module are the primitive steps of the suspendable
//! stream parser: each one either consumes its bytes from the cursor and
//! returns a value, or returns `None` ("need more"). The token decoder
//! parses from a scratch cursor and commits consumption only after a whole
//! token succeeds, so a reader that returns `None` may leave the scratch
//! cursor partially advanced.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Read a `u8`, or `None` if the buffer holds fewer bytes.
pub fn read_u8(src: &mut impl Buf) -> Option<u8> {
    (src.remaining() >= 1).then(|| src.get_u8())
}

/// Read a little-endian `u16`.
pub fn read_u16(src: &mut impl Buf) -> Option<u16> {
    (src.remaining() >= 2).then(|| src.get_u16_le())
}

/// Read a little-endian 3-byte unsigned integer.
pub fn read_u24(src: &mut impl Buf) -> Option<u32> {
    if src.remaining() < 3 {
        return None;
    }
    let lo = src.get_u16_le() as u32;
    let hi = src.get_u8() as u32;
    Some(hi << 16 | lo)
}

/// Read a little-endian `u32`.
pub fn read_u32(src: &mut impl Buf) -> Option<u32> {
    (src.remaining() >= 4).then(|| src.get_u32_le())
}

/// Read a little-endian `u64`.
pub fn read_u64(src: &mut impl Buf) -> Option<u64> {
    (src.remaining() >= 8).then(|| src.get_u64_le())
}

/// Read an `i8`.
pub fn read_i8(src: &mut impl Buf) -> Option<i8> {
    (src.remaining() >= 1).then(|| src.get_i8())
}

/// Read a little-endian `i16`.
pub fn read_i16(src: &mut impl Buf) -> Option<i16> {
    (src.remaining() >= 2).then(|| src.get_i16_le())
}

/// Read a little-endian `i32`.
pub fn read_i32(src: &mut impl Buf) -> Option<i32> {
    (src.remaining() >= 4).then(|| src.get_i32_le())
}

/// Read a little-endian `i64`.
pub fn read_i64(src: &mut impl Buf) -> Option<i64> {
    (src.remaining() >= 8).then(|| src.get_i64_le())
}

/// Read a little-endian `f32`.
pub fn read_f32(src: &mut impl Buf) -> Option<f32> {
    (src.remaining() >= 4).then(|| src.get_f32_le())
}

/// Read a little-endian `f64`.
pub fn read_f64(src: &mut impl Buf) -> Option<f64> {
    (src.remaining() >= 8).then(|| src.get_f64_le())
}

/// Read `n` raw bytes.
pub fn read_buffer(src: &mut impl Buf, n: usize) -> Option<Bytes> {
    (src.remaining() >= n).then(|| src.copy_to_bytes(n))
}

/// Read `n` bytes decoded as ASCII. Non-ASCII bytes are replaced.
pub fn read_ascii(src: &mut impl Buf, n: usize) -> Option<String> {
    if src.remaining() < n {
        return None;
    }
    let bytes = src.copy_to_bytes(n);
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a length-prefixed UCS-2 LE string (1-byte character count).
pub fn read_b_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 1 {
        return None;
    }
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a length-prefixed UCS-2 LE string (2-byte character count).
pub fn read_us_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 2 {
        return None;
    }
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Read a UCS-2 LE string of `char_count` characters.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Option<String> {
    if src.remaining() < char_count * 2 {
        return None;
    }

    let mut chars = Vec::with_capacity(char_count);
    for _ in 0..char_count {
        chars.push(src.get_u16_le());
    }

    // Lone surrogates are replaced rather than rejected; SQL Server permits
    // them in identifiers.
    Some(String::from_utf16_lossy(&chars))
}

/// Read a GUID in SQL Server's mixed-endian layout.
///
/// The first three groups are little-endian, the final eight bytes are
/// stored as-is.
pub fn read_uuid(src: &mut impl Buf) -> Option<uuid::Uuid> {
    if src.remaining() < 16 {
        return None;
    }
    let mut raw = [0u8; 16];
    src.copy_to_slice(&mut raw);

    let reordered = [
        raw[3], raw[2], raw[1], raw[0], raw[5], raw[4], raw[7], raw[6], raw[8], raw[9], raw[10],
        raw[11], raw[12], raw[13], raw[14], raw[15],
    ];
    Some(uuid::Uuid::from_bytes(reordered))
}

/// Write a length-prefixed UCS-2 LE string (1-byte character count).
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(255) as u8;
    dst.put_u8(len);
    for &c in &chars[..len as usize] {
        dst.put_u16_le(c);
    }
}

/// Write a length-prefixed UCS-2 LE string (2-byte character count).
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(65535) as u16;
    dst.put_u16_le(len);
    for &c in &chars[..len as usize] {
        dst.put_u16_le(c);
    }
}

/// Write a UCS-2 LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Calculate the byte length of a string once UCS-2 encoded.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Growable byte sink with position tracking.
///
/// Accumulates one outbound structure (a token, a type-info block, an entire
/// bulk row) before the framer fragments it into packets. Little-endian
/// throughout; growth is delegated to [`BytesMut`] which doubles capacity.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: BytesMut,
}

impl WriteBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
        }
    }

    /// Create a buffer with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        self.data.put_u8(v);
    }

    /// Write a little-endian `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.data.put_u16_le(v);
    }

    /// Write a little-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.data.put_u32_le(v);
    }

    /// Write a little-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.data.put_u64_le(v);
    }

    /// Write an `i8`.
    pub fn put_i8(&mut self, v: i8) {
        self.data.put_i8(v);
    }

    /// Write a little-endian `i16`.
    pub fn put_i16(&mut self, v: i16) {
        self.data.put_i16_le(v);
    }

    /// Write a little-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.data.put_i32_le(v);
    }

    /// Write a little-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.data.put_i64_le(v);
    }

    /// Write a little-endian `f32`.
    pub fn put_f32(&mut self, v: f32) {
        self.data.put_f32_le(v);
    }

    /// Write a little-endian `f64`.
    pub fn put_f64(&mut self, v: f64) {
        self.data.put_f64_le(v);
    }

    /// Write raw bytes.
    pub fn put_slice(&mut self, v: &[u8]) {
        self.data.put_slice(v);
    }

    /// Write a length-prefixed UCS-2 LE string (1-byte character count).
    pub fn put_b_varchar(&mut self, s: &str) {
        write_b_varchar(&mut self.data, s);
    }

    /// Write a length-prefixed UCS-2 LE string (2-byte character count).
    pub fn put_us_varchar(&mut self, s: &str) {
        write_us_varchar(&mut self.data, s);
    }

    /// Write a UCS-2 LE string without a length prefix.
    pub fn put_utf16(&mut self, s: &str) {
        write_utf16_string(&mut self.data, s);
    }

    /// Take the accumulated bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Borrow the accumulated bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Access the underlying `BytesMut` for direct chunk splitting.
    pub fn inner_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_b_varchar_roundtrip() {
        let original = "Hello, 世界!";
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, original);

        let mut cursor = buf.freeze();
        let decoded = read_b_varchar(&mut cursor).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_us_varchar_roundtrip() {
        let original = "Test string with Unicode: αβγ";
        let mut buf = BytesMut::new();
        write_us_varchar(&mut buf, original);

        let mut cursor = buf.freeze();
        let decoded = read_us_varchar(&mut cursor).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_b_varchar_needs_more() {
        // Claims 4 characters but only 2 bytes of payload follow.
        let data = [4u8, 0x41, 0x00];
        let mut cursor = &data[..];
        assert!(read_b_varchar(&mut cursor).is_none());
    }

    #[test]
    fn test_read_u24() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor = &data[..];
        assert_eq!(read_u24(&mut cursor), Some(0x030201));
    }

    #[test]
    fn test_read_uuid_mixed_endian() {
        // Wire layout for 12345678-1234-5678-1234-567812345678
        let wire = [
            0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x12, 0x34, 0x56, 0x78, 0x12, 0x34,
            0x56, 0x78,
        ];
        let mut cursor = &wire[..];
        let uuid = read_uuid(&mut cursor).unwrap();
        assert_eq!(
            uuid.to_string(),
            "12345678-1234-5678-1234-567812345678"
        );
    }

    #[test]
    fn test_read_ascii() {
        let data = b"SELECT";
        let mut cursor = &data[..];
        assert_eq!(read_ascii(&mut cursor, 6).unwrap(), "SELECT");
    }

    #[test]
    fn test_write_buffer_primitives() {
        let mut buf = WriteBuffer::new();
        buf.put_u8(0xAB);
        buf.put_u16(0x0102);
        buf.put_u32(0x03040506);
        assert_eq!(buf.position(), 7);
        assert_eq!(
            buf.take().as_ref(),
            &[0xAB, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_utf16_byte_len() {
        assert_eq!(utf16_byte_len("Hello"), 10);
        assert_eq!(utf16_byte_len("世界"), 4);
    }

    proptest::proptest! {
        #[test]
        fn prop_b_varchar_roundtrip(s in "\\PC{0,255}") {
            let mut buf = BytesMut::new();
            write_b_varchar(&mut buf, &s);
            let mut cursor = buf.freeze();
            let decoded = read_b_varchar(&mut cursor).unwrap();
            // Truncation at 255 UTF-16 units is the only permitted loss.
            if s.encode_utf16().count() <= 255 {
                proptest::prop_assert_eq!(decoded, s);
            }
        }

        #[test]
        fn prop_us_varchar_roundtrip(s in "\\PC{0,512}") {
            let mut buf = BytesMut::new();
            write_us_varchar(&mut buf, &s);
            let mut cursor = buf.freeze();
            let decoded = read_us_varchar(&mut cursor).unwrap();
            proptest::prop_assert_eq!(decoded, s);
        }
    }
}
