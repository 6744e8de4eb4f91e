use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cap on a single event body (8 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the REST API binds to
    pub host: String,

    /// Port for the REST API server
    pub port: u16,

    /// Largest accepted event body in bytes
    pub max_message_size: usize,

    /// Drop sessions idle for longer than this many seconds (never, when unset)
    pub session_ttl: Option<u64>,

    /// Log file path, when logging to a file instead of stderr
    pub log_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            session_ttl: None,
            log_path: None,
        }
    }
}

impl AppConfig {
    /// Socket address string for the HTTP server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
