//! Configuration types and their defaults.

use super::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Bearer token protecting `/session`, `/send` and `/logout`
    #[serde(default)]
    pub auth: AuthConfig,

    /// Credential persistence and reconnect policy
    #[serde(default)]
    pub session: SessionConfig,

    /// Protocol client behaviour
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Media fetched by URL for outbound sends
    #[serde(default)]
    pub media: MediaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Empty means protected routes answer 500 until a token is set.
    #[serde(default)]
    pub token: SecretString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root data directory; credentials live in `<data_dir>/auth`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Wipe stored credentials before the first connect.
    #[serde(default)]
    pub reset_on_start: bool,

    /// Exit the process after `/logout` so the orchestrator restarts it.
    /// When false, the supervisor immediately starts a fresh pairing.
    #[serde(default = "default_true")]
    pub exit_on_logout: bool,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

impl SessionConfig {
    pub fn auth_dir(&self) -> PathBuf {
        self.data_dir.join("auth")
    }

    pub fn store_path(&self) -> PathBuf {
        self.auth_dir().join("session.db")
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reset_on_start: false,
            exit_on_logout: true,
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Name shown under "Linked devices" on the phone
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Answer "ping" with "pong ✅"
    #[serde(default = "default_true")]
    pub ping_reply: bool,

    /// Also draw pairing QR codes on stderr
    #[serde(default = "default_true")]
    pub print_qr_terminal: bool,
}

fn default_device_name() -> String {
    "wagate".to_string()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            ping_reply: true,
            print_qr_terminal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_max_bytes")]
    pub max_bytes: u64,

    #[serde(default = "default_media_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_media_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_media_timeout_secs() -> u64 {
    60
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_media_max_bytes(),
            timeout_secs: default_media_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write daily-rolling log files here in addition to stderr
    #[serde(default)]
    pub file_dir: Option<PathBuf>,

    /// Emit stderr logs as JSON lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
            json: false,
        }
    }
}
