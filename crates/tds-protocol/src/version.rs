//! TDS protocol version definitions.

use core::fmt;

/// TDS protocol version.
///
/// Variants are declared in protocol order so the derived `Ord` matches
/// feature gating: a capability introduced in 7.2 is available for every
/// version `>= V7_2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TdsVersion {
    /// TDS 7.0 (SQL Server 7.0).
    V7_0,
    /// TDS 7.1 (SQL Server 2000).
    V7_1,
    /// TDS 7.2 (SQL Server 2005).
    V7_2,
    /// TDS 7.3A (SQL Server 2008).
    V7_3A,
    /// TDS 7.3B (SQL Server 2008 R2).
    V7_3B,
    /// TDS 7.4 (SQL Server 2012+).
    V7_4,
}

impl TdsVersion {
    /// Parse a version from its configuration name (`"7_4"`, `"7_3_A"`, ...).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "7_0" => Some(Self::V7_0),
            "7_1" => Some(Self::V7_1),
            "7_2" => Some(Self::V7_2),
            "7_3_A" | "7_3A" => Some(Self::V7_3A),
            "7_3_B" | "7_3B" => Some(Self::V7_3B),
            "7_4" => Some(Self::V7_4),
            _ => None,
        }
    }

    /// The raw version value carried in LOGIN7 and LOGINACK.
    #[must_use]
    pub const fn wire_value(self) -> u32 {
        match self {
            Self::V7_0 => 0x70000000,
            Self::V7_1 => 0x71000001,
            Self::V7_2 => 0x72090002,
            Self::V7_3A => 0x730A0003,
            Self::V7_3B => 0x730B0003,
            Self::V7_4 => 0x74000004,
        }
    }

    /// Resolve a LOGINACK version value to a known version.
    #[must_use]
    pub const fn from_wire_value(value: u32) -> Option<Self> {
        match value {
            0x70000000 => Some(Self::V7_0),
            0x71000000 | 0x71000001 => Some(Self::V7_1),
            0x72090002 => Some(Self::V7_2),
            0x730A0003 => Some(Self::V7_3A),
            0x730B0003 => Some(Self::V7_3B),
            0x74000004 => Some(Self::V7_4),
            _ => None,
        }
    }

    /// Check if column metadata carries a 4-byte user type.
    ///
    /// TDS 7.2 widened `userType` from `u16` to `u32`.
    #[must_use]
    pub fn has_u32_user_type(self) -> bool {
        self >= Self::V7_2
    }

    /// Check if DONE tokens carry a 8-byte row count.
    ///
    /// Before TDS 7.2 the row count was 4 bytes.
    #[must_use]
    pub fn has_u64_row_count(self) -> bool {
        self >= Self::V7_2
    }

    /// Check if this version supports DATE, TIME, DATETIME2, and
    /// DATETIMEOFFSET column types (introduced in TDS 7.3).
    #[must_use]
    pub fn supports_date_time_types(self) -> bool {
        self >= Self::V7_3A
    }

    /// Check if this version supports UTF-8 collations.
    #[must_use]
    pub fn supports_utf8(self) -> bool {
        self >= Self::V7_4
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::V7_0 => "7_0",
            Self::V7_1 => "7_1",
            Self::V7_2 => "7_2",
            Self::V7_3A => "7_3_A",
            Self::V7_3B => "7_3_B",
            Self::V7_4 => "7_4",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(TdsVersion::V7_0 < TdsVersion::V7_1);
        assert!(TdsVersion::V7_1 < TdsVersion::V7_2);
        assert!(TdsVersion::V7_3A < TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B < TdsVersion::V7_4);
    }

    #[test]
    fn test_user_type_width() {
        assert!(!TdsVersion::V7_1.has_u32_user_type());
        assert!(TdsVersion::V7_2.has_u32_user_type());
        assert!(TdsVersion::V7_4.has_u32_user_type());
    }

    #[test]
    fn test_parse_roundtrip() {
        for v in [
            TdsVersion::V7_0,
            TdsVersion::V7_1,
            TdsVersion::V7_2,
            TdsVersion::V7_3A,
            TdsVersion::V7_3B,
            TdsVersion::V7_4,
        ] {
            assert_eq!(TdsVersion::parse(&v.to_string()), Some(v));
        }
    }

    #[test]
    fn test_wire_value_roundtrip() {
        assert_eq!(
            TdsVersion::from_wire_value(TdsVersion::V7_4.wire_value()),
            Some(TdsVersion::V7_4)
        );
        assert_eq!(TdsVersion::from_wire_value(0xDEADBEEF), None);
    }
}
