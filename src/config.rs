//! Connection configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default cap for response bodies (32 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 << 20;

/// Configuration for direct Livestatus connections.
///
/// The address selects the transport: an address containing `:` is dialled
/// over TCP (`host:port`), anything else is treated as a Unix socket path.
/// TLS settings apply to TCP only and are ignored for Unix sockets.
#[derive(Debug, Clone)]
pub struct LivestatusConfig {
    /// TCP address (e.g. `localhost:6557`) or Unix socket path.
    pub address: String,

    /// Time to wait for a connection (default: 10s). Zero disables the bound.
    pub connect_timeout: Duration,
    /// Time to wait for a response (default: 30s). Zero disables the bound.
    pub read_timeout: Duration,
    /// Time to wait for a write (default: 30s). Falls back to `read_timeout`
    /// when zero.
    pub write_timeout: Duration,
    /// Safety cap for response bodies to avoid unbounded allocations
    /// (default: 32 MiB).
    pub max_body_bytes: usize,

    /// Enable TLS when connecting over TCP. Ignored for Unix sockets.
    pub use_tls: bool,
    /// Skip server certificate verification. DO NOT use in production.
    pub insecure_skip_verify: bool,
    /// Optional PEM-encoded CA bundle trusted in addition to system roots.
    pub ca_file: Option<PathBuf>,
    /// Optional client certificate for mTLS (requires `key_file`).
    pub cert_file: Option<PathBuf>,
    /// Private key for the client certificate.
    pub key_file: Option<PathBuf>,
}

impl LivestatusConfig {
    /// Creates a configuration with sensible defaults.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            use_tls: false,
            insecure_skip_verify: false,
            ca_file: None,
            cert_file: None,
            key_file: None,
        }
    }

    /// Whether the address denotes a Unix socket path (no `:`).
    pub fn is_unix(&self) -> bool {
        !self.address.contains(':')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LivestatusConfig::new("localhost:6557");
        assert_eq!(config.address, "localhost:6557");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.write_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 32 << 20);
        assert!(!config.use_tls);
    }

    #[test]
    fn network_selection() {
        assert!(!LivestatusConfig::new("localhost:6557").is_unix());
        assert!(LivestatusConfig::new("/var/run/livestatus.sock").is_unix());
    }
}
