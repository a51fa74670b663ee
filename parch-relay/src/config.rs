//! Configuration loading for parch-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional and falls back to its default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for parch-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Host directory storage configuration.
    pub storage: StorageConfig,
    /// Rate and shape limiting configuration.
    pub limits: LimitsConfig,
    /// Host liveness check configuration.
    pub liveness: LivenessConfig,
    /// Capability verification configuration.
    pub capability: CapabilityConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Maintenance task configuration.
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Let connections that send an `Origin` header become host authors
    /// (default: false).
    #[serde(default)]
    pub allow_browser_authors: bool,
}

/// Host directory storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding host records.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Rate and shape limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// WebSocket upgrades allowed per source IP per minute (default: 30).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Chat sends allowed per session within one window (default: 40).
    #[serde(default = "default_chat_messages_per_window")]
    pub chat_messages_per_window: usize,
    /// Length of the chat sliding window in seconds (default: 10).
    #[serde(default = "default_chat_window_secs")]
    pub chat_window_secs: u64,
    /// Maximum serialized envelope size in bytes (default: 128 KiB).
    #[serde(default = "default_max_envelope_bytes")]
    pub max_envelope_bytes: usize,
    /// Maximum entries in an envelope's `wrapped_keys` list (default: 512).
    #[serde(default = "default_max_wrapped_keys")]
    pub max_wrapped_keys: usize,
    /// Outbound mailbox capacity per session (default: 64).
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Authenticated sessions allowed per source IP (default: 32).
    #[serde(default = "default_max_authenticated_per_ip")]
    pub max_authenticated_per_ip: usize,
    /// Largest inbound WebSocket message accepted, in bytes (default: 256 KiB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Host liveness check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// How long a joining client waits for the author's ack (default: 2000).
    #[serde(default = "default_liveness_timeout_ms")]
    pub timeout_ms: u64,
}

/// Capability verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityConfig {
    /// Tolerated host clock lead for `issued_at`, in seconds (default: 90).
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the maintenance task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_connections_per_ip() -> u32 {
    30
}

fn default_chat_messages_per_window() -> usize {
    40
}

fn default_chat_window_secs() -> u64 {
    10
}

fn default_max_envelope_bytes() -> usize {
    128 * 1024 // 128 KiB
}

fn default_max_wrapped_keys() -> usize {
    512
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_max_authenticated_per_ip() -> usize {
    32
}

fn default_max_frame_bytes() -> usize {
    256 * 1024 // 256 KiB
}

fn default_liveness_timeout_ms() -> u64 {
    2000
}

fn default_clock_skew_secs() -> i64 {
    90
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            allow_browser_authors: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_ip: default_connections_per_ip(),
            chat_messages_per_window: default_chat_messages_per_window(),
            chat_window_secs: default_chat_window_secs(),
            max_envelope_bytes: default_max_envelope_bytes(),
            max_wrapped_keys: default_max_wrapped_keys(),
            mailbox_capacity: default_mailbox_capacity(),
            max_authenticated_per_ip: default_max_authenticated_per_ip(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_liveness_timeout_ms(),
        }
    }
}

impl LivenessConfig {
    /// The liveness timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: default_clock_skew_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert!(!config.server.allow_browser_authors);
        assert_eq!(config.limits.chat_messages_per_window, 40);
        assert_eq!(config.limits.chat_window_secs, 10);
        assert_eq!(config.limits.max_envelope_bytes, 131072);
        assert_eq!(config.limits.max_wrapped_keys, 512);
        assert_eq!(config.limits.mailbox_capacity, 64);
        assert_eq!(config.liveness.timeout(), Duration::from_secs(2));
        assert_eq!(config.capability.clock_skew_secs, 90);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
allow_browser_authors = true

[storage]
database = "/data/relay.db"

[limits]
chat_messages_per_window = 5
mailbox_capacity = 8

[liveness]
timeout_ms = 500

[cleanup]
interval_secs = 60
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert!(config.server.allow_browser_authors);
        assert_eq!(config.storage.database, PathBuf::from("/data/relay.db"));
        assert_eq!(config.limits.chat_messages_per_window, 5);
        assert_eq!(config.limits.mailbox_capacity, 8);
        assert_eq!(config.limits.chat_window_secs, 10);
        assert_eq!(config.liveness.timeout_ms, 500);
        assert_eq!(config.cleanup.interval_secs, 60);
        assert!(config.cleanup.enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.limits.max_frame_bytes, 256 * 1024);
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn from_file_reads_and_reports_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[liveness]\ntimeout_ms = 750").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.liveness.timeout_ms, 750);

        let missing = Config::from_file(std::path::Path::new("/nonexistent/relay.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[limits]\nmailbox_capacity = \"many\"").unwrap();
        assert!(matches!(
            Config::from_file(bad.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
