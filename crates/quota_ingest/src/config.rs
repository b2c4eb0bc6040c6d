//! Service configuration, loaded once at startup.

use crate::error::FeedError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Connection settings, deserialized from `connection.json`.
///
/// `redis_pool_size` is accepted for compatibility with existing config
/// files; the single-threaded consumer drives exactly one store connection,
/// so nothing is sized by it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Document store endpoint: a full `redis://` URL or a bare `host:port`.
    pub redis_url: String,
    /// TCP port the ingest listener binds on.
    pub server_port: u16,
    /// Read timeout on the feed socket, in milliseconds.
    pub socket_timeout_ms: u64,
    /// Legacy pool sizing knob; parsed, not used.
    pub redis_pool_size: u32,
    /// Bound on establishing the store connection, in milliseconds.
    pub redis_wait_timeout_ms: u64,
    /// Optional store password, folded into the connection URL.
    #[serde(default)]
    pub redis_password: Option<String>,
}

impl ServiceConfig {
    /// Loads the configuration file. Failure is fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FeedError::LoadFailed(format!("config {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| FeedError::Parse(format!("config: {e}")))
    }

    /// Read timeout applied to the feed socket.
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Bound on store connection establishment.
    pub fn redis_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_wait_timeout_ms)
    }
}
