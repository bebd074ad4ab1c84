//! SQL Server collation decoding.
//!
//! A collation travels as a fixed 5-byte descriptor inside COLMETADATA and
//! type-info blocks:
//!
//! ```text
//! byte 0  LL LL LL LL   LCID bits 0-7
//! byte 1  LL LL LL LL   LCID bits 8-15
//! byte 2  FF FF LL LL   flag bits (high nibble), LCID bits 16-19 (low nibble)
//! byte 3  VV VV FF FF   version (high nibble), flag bits (low nibble)
//! byte 4  SS SS SS SS   sort id
//! ```
//!
//! The codepage used for single-byte character data is resolved from the
//! descriptor: UTF-8 collations (SQL Server 2019+) need no codepage, a zero
//! sort id selects by LCID, a non-zero sort id selects by the legacy SQL
//! sort order table, and anything unrecognized falls back to `CP1252`.
//!
//! # References
//!
//! - [MS-LCID: Windows Language Code Identifier Reference](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-lcid/)
//! - [Code Page Identifiers](https://learn.microsoft.com/en-us/windows/win32/intl/code-page-identifiers)

use bitflags::bitflags;
use bytes::Buf;

/// Size of a collation descriptor on the wire.
pub const COLLATION_SIZE: usize = 5;

/// Codepage used when nothing else resolves.
pub const FALLBACK_CODEPAGE: &str = "CP1252";

bitflags! {
    /// Collation comparison flags.
    ///
    /// Bit positions follow the combined flag byte
    /// `(b2 & 0xF0) | (b3 & 0x0F)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CollationFlags: u8 {
        /// Binary comparison (code-point order).
        const BINARY = 0x01;
        /// Binary-code-point comparison (SQL Server 2005+).
        const BINARY2 = 0x02;
        /// UTF-8 collation (SQL Server 2019+).
        const UTF8 = 0x04;
        /// Reserved bit.
        const RESERVED = 0x08;
        /// Case-insensitive comparison.
        const IGNORE_CASE = 0x10;
        /// Accent-insensitive comparison.
        const IGNORE_ACCENT = 0x20;
        /// Kana-type-insensitive comparison.
        const IGNORE_KANA = 0x40;
        /// Width-insensitive comparison.
        const IGNORE_WIDTH = 0x80;
    }
}

/// A decoded SQL Server collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collation {
    /// Locale ID (20 bits).
    pub lcid: u32,
    /// Comparison flags.
    pub flags: CollationFlags,
    /// Collation version (4 bits).
    pub version: u8,
    /// Legacy SQL sort order id; 0 for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// The server default used when emitting metadata without a negotiated
    /// collation: `SQL_Latin1_General_CP1_CI_AS` (sort id 52).
    pub const DEFAULT: Self = Self {
        lcid: 0x0409,
        flags: CollationFlags::IGNORE_CASE
            .union(CollationFlags::IGNORE_KANA)
            .union(CollationFlags::IGNORE_WIDTH),
        version: 0,
        sort_id: 52,
    };

    /// Decode a collation from its 5-byte wire form.
    ///
    /// Returns `None` when fewer than 5 bytes are available.
    pub fn decode(src: &mut impl Buf) -> Option<Self> {
        if src.remaining() < COLLATION_SIZE {
            return None;
        }
        let mut raw = [0u8; COLLATION_SIZE];
        src.copy_to_slice(&mut raw);
        Some(Self::from_bytes(raw))
    }

    /// Decode a collation from exactly 5 bytes.
    #[must_use]
    pub fn from_bytes(raw: [u8; COLLATION_SIZE]) -> Self {
        let lcid =
            ((raw[2] & 0x0F) as u32) << 16 | (raw[1] as u32) << 8 | raw[0] as u32;
        let flags = CollationFlags::from_bits_retain((raw[2] & 0xF0) | (raw[3] & 0x0F));
        let version = (raw[3] & 0xF0) >> 4;
        let sort_id = raw[4];

        Self {
            lcid,
            flags,
            version,
            sort_id,
        }
    }

    /// Encode the collation to its 5-byte wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; COLLATION_SIZE] {
        let bits = self.flags.bits();
        [
            (self.lcid & 0xFF) as u8,
            ((self.lcid >> 8) & 0xFF) as u8,
            (((self.lcid >> 16) & 0x0F) as u8) | (bits & 0xF0),
            (self.version << 4) | (bits & 0x0F),
            self.sort_id,
        ]
    }

    /// Check whether this is a UTF-8 collation.
    #[must_use]
    pub fn is_utf8(self) -> bool {
        self.flags.contains(CollationFlags::UTF8)
    }

    /// Resolve the codepage name for single-byte character data.
    ///
    /// Resolution order: UTF-8 flag, then LCID (when `sort_id` is 0), then
    /// the legacy sort order table, then [`FALLBACK_CODEPAGE`].
    #[must_use]
    pub fn codepage(self) -> &'static str {
        if self.is_utf8() {
            return "utf8";
        }
        let resolved = if self.sort_id == 0 {
            codepage_by_lcid(self.lcid)
        } else {
            codepage_by_sort_id(self.sort_id)
        };
        resolved.unwrap_or(FALLBACK_CODEPAGE)
    }

    /// Resolve the `encoding_rs` encoding for this collation's codepage.
    ///
    /// UTF-8 collations return [`encoding_rs::UTF_8`]; unknown codepages
    /// fall back to Windows-1252.
    #[cfg(feature = "encoding")]
    #[must_use]
    pub fn encoding(self) -> &'static encoding_rs::Encoding {
        match self.codepage() {
            "utf8" => encoding_rs::UTF_8,
            "CP437" | "CP850" => encoding_rs::WINDOWS_1252,
            "CP874" => encoding_rs::WINDOWS_874,
            "CP932" => encoding_rs::SHIFT_JIS,
            "CP936" => encoding_rs::GB18030,
            "CP949" => encoding_rs::EUC_KR,
            "CP950" => encoding_rs::BIG5,
            "CP1250" => encoding_rs::WINDOWS_1250,
            "CP1251" => encoding_rs::WINDOWS_1251,
            "CP1253" => encoding_rs::WINDOWS_1253,
            "CP1254" => encoding_rs::WINDOWS_1254,
            "CP1255" => encoding_rs::WINDOWS_1255,
            "CP1256" => encoding_rs::WINDOWS_1256,
            "CP1257" => encoding_rs::WINDOWS_1257,
            "CP1258" => encoding_rs::WINDOWS_1258,
            _ => encoding_rs::WINDOWS_1252,
        }
    }
}

/// Map a locale ID to its Windows codepage.
///
/// The table covers the primary language IDs SQL Server assigns single-byte
/// codepages to; Western European locales share `CP1252`.
#[must_use]
pub fn codepage_by_lcid(lcid: u32) -> Option<&'static str> {
    // Sub-language variants share the primary language's codepage.
    match lcid & 0xFFFF {
        // Japanese
        0x0411 => Some("CP932"),

        // Chinese (Simplified): PRC, Singapore
        0x0804 | 0x1004 => Some("CP936"),

        // Chinese (Traditional): Taiwan, Hong Kong SAR, Macao SAR
        0x0404 | 0x0C04 | 0x1404 => Some("CP950"),

        // Korean
        0x0412 => Some("CP949"),

        // Thai
        0x041E => Some("CP874"),

        // Vietnamese
        0x042A => Some("CP1258"),

        // Central/Eastern European: Czech, Polish, Hungarian, Croatian,
        // Serbian (Latin), Bosnian (Latin), Slovak, Slovenian, Romanian,
        // Albanian
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424
        | 0x0418 | 0x041C => Some("CP1250"),

        // Cyrillic: Russian, Ukrainian, Belarusian, Bulgarian, Macedonian,
        // Serbian (Cyrillic), Bosnian (Cyrillic), Kyrgyz, Uzbek (Cyrillic),
        // Tatar, Mongolian, Sakha
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843
        | 0x0444 | 0x0450 | 0x0485 => Some("CP1251"),

        // Greek
        0x0408 => Some("CP1253"),

        // Turkish, Azerbaijani (Latin)
        0x041F | 0x042C => Some("CP1254"),

        // Hebrew
        0x040D => Some("CP1255"),

        // Arabic variants, Farsi, Urdu, Dari, Pashto
        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401
        | 0x2801 | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420
        | 0x048C | 0x0463 => Some("CP1256"),

        // Baltic: Estonian, Latvian, Lithuanian
        0x0425..=0x0427 => Some("CP1257"),

        // Western European and most everything else on CP1252
        0x0409 | 0x0809 | 0x0C09 | 0x1009 | 0x1409 | 0x1809 | 0x040C | 0x080C | 0x0C0C
        | 0x100C | 0x140C | 0x0407 | 0x0807 | 0x0C07 | 0x1007 | 0x1407 | 0x040A | 0x080A
        | 0x0C0A | 0x0410 | 0x0810 | 0x0416 | 0x0816 | 0x0413 | 0x0813 | 0x0406 | 0x0414
        | 0x0814 | 0x041D | 0x081D | 0x040B | 0x040F | 0x0403 | 0x0456 | 0x042D | 0x0436
        | 0x0421 | 0x043E | 0x0441 => Some("CP1252"),

        _ => None,
    }
}

/// Map a legacy SQL sort order id to its codepage.
///
/// Sort ids predate Windows collations; the assignments follow the SQL
/// Server sort order tables.
#[must_use]
pub fn codepage_by_sort_id(sort_id: u8) -> Option<&'static str> {
    match sort_id {
        30..=34 => Some("CP437"),
        40..=49 | 55..=61 => Some("CP850"),
        50..=54 | 71..=75 | 183..=186 | 210..=217 => Some("CP1252"),
        80..=96 => Some("CP1250"),
        104..=108 => Some("CP1251"),
        112..=114 | 120..=124 => Some("CP1253"),
        128..=130 => Some("CP1254"),
        136..=138 => Some("CP1255"),
        144..=146 => Some("CP1256"),
        152..=160 => Some("CP1257"),
        192..=193 | 200 => Some("CP932"),
        194..=195 | 201 => Some("CP949"),
        196..=197 | 202 => Some("CP950"),
        198..=199 | 203 => Some("CP936"),
        204..=206 => Some("CP874"),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_collation_sample() {
        // Latin1_General_100_CI_AI_SC_UTF8 as seen on the wire.
        let collation = Collation::from_bytes([0x09, 0x04, 0xE0, 0x24, 0x00]);

        assert_eq!(collation.lcid, 0x0409);
        assert_eq!(collation.sort_id, 0);
        assert_eq!(collation.version, 2);
        assert!(collation.flags.contains(CollationFlags::UTF8));
        assert!(collation.flags.contains(CollationFlags::IGNORE_ACCENT));
        assert!(collation.flags.contains(CollationFlags::IGNORE_KANA));
        assert!(collation.flags.contains(CollationFlags::IGNORE_WIDTH));
        assert!(!collation.flags.contains(CollationFlags::IGNORE_CASE));
        assert!(!collation.flags.contains(CollationFlags::BINARY));
        assert_eq!(collation.codepage(), "utf8");
    }

    #[test]
    fn test_wire_roundtrip() {
        let raw = [0x09, 0x04, 0xD0, 0x00, 0x34];
        let collation = Collation::from_bytes(raw);
        assert_eq!(collation.lcid, 0x0409);
        assert!(collation.flags.contains(CollationFlags::IGNORE_CASE));
        assert_eq!(collation.sort_id, 52);
        assert_eq!(collation.to_bytes(), raw);
    }

    #[test]
    fn test_lcid_uses_low_nibble_of_byte_2() {
        let collation = Collation::from_bytes([0x01, 0x02, 0x13, 0x00, 0x00]);
        assert_eq!(collation.lcid, 0x030201);
        assert!(collation.flags.contains(CollationFlags::IGNORE_CASE));
    }

    #[test]
    fn test_codepage_by_lcid() {
        assert_eq!(codepage_by_lcid(0x0411), Some("CP932"));
        assert_eq!(codepage_by_lcid(0x0804), Some("CP936"));
        assert_eq!(codepage_by_lcid(0x0419), Some("CP1251"));
        assert_eq!(codepage_by_lcid(0x0409), Some("CP1252"));
        assert_eq!(codepage_by_lcid(0x9999), None);
    }

    #[test]
    fn test_codepage_resolution_order() {
        // Zero sort id resolves by LCID.
        let windows = Collation {
            lcid: 0x0419,
            flags: CollationFlags::empty(),
            version: 0,
            sort_id: 0,
        };
        assert_eq!(windows.codepage(), "CP1251");

        // Non-zero sort id wins over the LCID.
        let legacy = Collation {
            lcid: 0x0419,
            flags: CollationFlags::empty(),
            version: 0,
            sort_id: 30,
        };
        assert_eq!(legacy.codepage(), "CP437");

        // Unknown everything falls back to CP1252.
        let unknown = Collation {
            lcid: 0xFFFFF,
            flags: CollationFlags::empty(),
            version: 0,
            sort_id: 0,
        };
        assert_eq!(unknown.codepage(), "CP1252");
    }

    #[test]
    fn test_decode_needs_five_bytes() {
        let mut short = &[0x09u8, 0x04, 0xD0][..];
        assert!(Collation::decode(&mut short).is_none());
    }

    #[cfg(feature = "encoding")]
    #[test]
    fn test_encoding_resolution() {
        let jp = Collation {
            lcid: 0x0411,
            flags: CollationFlags::empty(),
            version: 0,
            sort_id: 0,
        };
        assert_eq!(jp.encoding().name(), "Shift_JIS");

        let utf8 = Collation {
            lcid: 0x0409,
            flags: CollationFlags::UTF8,
            version: 2,
            sort_id: 0,
        };
        assert_eq!(utf8.encoding().name(), "UTF-8");
    }

    proptest::proptest! {
        #[test]
        fn prop_wire_roundtrip(raw in proptest::array::uniform5(0u8..=255)) {
            let collation = Collation::from_bytes(raw);
            proptest::prop_assert_eq!(collation.to_bytes(), raw);
        }
    }

    #[cfg(feature = "encoding")]
    #[test]
    fn test_decode_cyrillic_text() {
        let ru = Collation {
            lcid: 0x0419,
            flags: CollationFlags::empty(),
            version: 0,
            sort_id: 0,
        };
        // "Привет" in Windows-1251
        let cp1251_bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        let (decoded, _, had_errors) = ru.encoding().decode(&cp1251_bytes);
        assert!(!had_errors);
        assert_eq!(decoded, "Привет");
    }
}
