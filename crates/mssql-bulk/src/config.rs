//! Connection configuration.

use std::time::Duration;

use tds_protocol::packet::DEFAULT_PACKET_SIZE;
use tds_protocol::version::TdsVersion;

/// Settings for a bulk-load connection.
///
/// The transport itself (TCP, TLS) is established by the caller; this
/// covers only what the protocol layer needs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Negotiated TDS packet size.
    pub packet_size: usize,
    /// How long to wait for the server to acknowledge a cancellation
    /// before tearing the connection down.
    pub cancel_timeout: Duration,
    /// Encode instant-bearing date values relative to UTC.
    pub use_utc: bool,
    /// Negotiated protocol version.
    pub tds_version: TdsVersion,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            cancel_timeout: Duration::from_secs(5),
            use_utc: true,
            tds_version: TdsVersion::V7_4,
        }
    }
}

impl Config {
    /// Set the packet size.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the cancel timeout.
    #[must_use]
    pub fn cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    /// Set UTC handling for date-family encoding.
    #[must_use]
    pub fn use_utc(mut self, use_utc: bool) -> Self {
        self.use_utc = use_utc;
        self
    }

    /// Set the TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.cancel_timeout, Duration::from_secs(5));
        assert!(config.use_utc);
        assert_eq!(config.tds_version, TdsVersion::V7_4);
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .packet_size(8192)
            .cancel_timeout(Duration::from_millis(500))
            .use_utc(false);
        assert_eq!(config.packet_size, 8192);
        assert_eq!(config.cancel_timeout, Duration::from_millis(500));
        assert!(!config.use_utc);
    }
}
