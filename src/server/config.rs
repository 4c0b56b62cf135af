//! Gateway configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::DEFAULT_CHUNK_SIZE;
use crate::recording::ObjectStorageConfig;

/// Gateway configuration options
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: SocketAddr,

    /// Address of the display daemon
    pub daemon_addr: SocketAddr,

    /// Upload chunk ceiling in bytes (a tunable, not a protocol limit)
    pub chunk_size: usize,

    /// Depth of the per-session outbound instruction queue
    ///
    /// This is the upload pipelines' backpressure: producers suspend once
    /// the daemon writer falls this many instructions behind.
    pub outbound_queue: usize,

    /// Depth of the per-download byte queue feeding a response body
    pub download_queue: usize,

    /// Directory the daemon writes session recordings into
    pub recording_root: PathBuf,

    /// Wait after session close before looking for the recording artifact
    pub recording_grace: Duration,

    /// Key prefix for uploaded recordings
    pub recording_key_prefix: String,

    /// Object storage target; recordings stay local when unset
    pub storage: Option<ObjectStorageConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
            daemon_addr: ([127, 0, 0, 1], 4822).into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            outbound_queue: 32,
            download_queue: 32,
            recording_root: PathBuf::from("/var/lib/guac-gateway/recordings"),
            recording_grace: Duration::from_secs(2),
            recording_key_prefix: String::new(),
            storage: None,
        }
    }
}

impl GatewayConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the daemon address
    pub fn daemon(mut self, addr: SocketAddr) -> Self {
        self.daemon_addr = addr;
        self
    }

    /// Set the upload chunk ceiling
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the recording root directory
    pub fn recording_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.recording_root = root.into();
        self
    }

    /// Set the recording grace period
    pub fn recording_grace(mut self, grace: Duration) -> Self {
        self.recording_grace = grace;
        self
    }

    /// Set the object storage target
    pub fn storage(mut self, storage: ObjectStorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.daemon_addr.port(), 4822);
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.recording_grace, Duration::from_secs(2));
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let config = GatewayConfig::default()
            .bind(([127, 0, 0, 1], 9090).into())
            .daemon(([10, 0, 0, 2], 4822).into())
            .chunk_size(64 * 1024)
            .recording_root("/tmp/rec")
            .recording_grace(Duration::from_millis(500));

        assert_eq!(config.bind_addr.port(), 9090);
        assert_eq!(config.daemon_addr, ([10, 0, 0, 2], 4822).into());
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.recording_root, PathBuf::from("/tmp/rec"));
        assert_eq!(config.recording_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_chunk_size_floor() {
        let config = GatewayConfig::default().chunk_size(0);
        assert_eq!(config.chunk_size, 1);
    }
}
