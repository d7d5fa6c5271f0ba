//! Configuration Module
//!
//! Handles configuration loading, environment overrides and validation.

pub mod secrets;
mod types;

pub use secrets::SecretString;
pub use types::{
    AuthConfig, Config, LoggingConfig, MediaConfig, ServerConfig, SessionConfig, WhatsAppConfig,
};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Values accepted by `RESET_SESSION` and friends as "on".
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/wagate/config.toml
    /// 3. Local config: ./wagate.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        tracing::debug!("Loading configuration...");

        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists()
        {
            tracing::debug!("Loading system config from: {:?}", system_config_path);
            config = Self::read_file(&system_config_path)?;
        }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("Loading local config from: {:?}", local_config_path);
            config = Self::read_file(&local_config_path)?;
        }

        Ok(Self::apply_env_overrides(config, |key| std::env::var(key).ok()))
    }

    /// Load configuration from a specific file path, then apply the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from custom path: {:?}", path);

        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let config = Self::read_file(path)?;

        Ok(Self::apply_env_overrides(config, |key| std::env::var(key).ok()))
    }

    fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wagate").join("config.toml"))
    }

    fn local_config_path() -> PathBuf {
        PathBuf::from("./wagate.toml")
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Overlay the deployment environment (`PORT`, `AUTH_TOKEN`, `LOG_LEVEL`,
    /// `RESET_SESSION`, ...) onto `config`. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env_overrides<F>(mut config: Self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(port) => config.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }

        if let Some(bind) = lookup("BIND_ADDR") {
            config.server.bind = bind;
        }

        if let Some(token) = lookup("AUTH_TOKEN") {
            config.auth.token = SecretString::new(token);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level.trim().to_ascii_lowercase();
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.logging.json = format.trim().eq_ignore_ascii_case("json");
        }

        if let Some(dir) = lookup("LOG_FILE_DIR") {
            config.logging.file_dir = Some(PathBuf::from(dir));
        }

        if let Some(reset) = lookup("RESET_SESSION") {
            config.session.reset_on_start = parse_flag(&reset);
        }

        if let Some(dir) = lookup("DATA_DIR") {
            config.session.data_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        tracing::debug!("Validating configuration...");

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be non-zero");
        }

        if self.session.reconnect_initial_ms == 0
            || self.session.reconnect_initial_ms > self.session.reconnect_max_ms
        {
            anyhow::bail!(
                "Reconnect delays must satisfy 0 < initial ({}) <= max ({})",
                self.session.reconnect_initial_ms,
                self.session.reconnect_max_ms
            );
        }

        if self.auth.token.is_empty() {
            tracing::warn!("AUTH_TOKEN is empty: /session, /send and /logout will answer 500");
        }

        Ok(())
    }

    /// Render the configuration as TOML (secrets redacted).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert!(config.auth.token.is_empty());
        assert!(!config.session.reset_on_start);
        assert!(config.session.exit_on_logout);
        assert!(config.whatsapp.ping_reply);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let mut config = Config::default();
        config.session.reconnect_initial_ms = 10_000;
        config.session.reconnect_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::apply_env_overrides(
            Config::default(),
            env(&[
                ("PORT", "3000"),
                ("AUTH_TOKEN", "s3cret"),
                ("LOG_LEVEL", "DEBUG"),
                ("RESET_SESSION", "true"),
                ("DATA_DIR", "/app/data"),
                ("LOG_FORMAT", "JSON"),
            ]),
        );
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.token.expose_secret(), "s3cret");
        assert_eq!(config.logging.level, "debug");
        assert!(config.session.reset_on_start);
        assert!(config.logging.json);
        assert_eq!(config.session.store_path(), PathBuf::from("/app/data/auth/session.db"));
    }

    #[test]
    fn test_reset_session_only_true_values() {
        let config =
            Config::apply_env_overrides(Config::default(), env(&[("RESET_SESSION", "false")]));
        assert!(!config.session.reset_on_start);

        let config =
            Config::apply_env_overrides(Config::default(), env(&[("RESET_SESSION", "1")]));
        assert!(config.session.reset_on_start);
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let config = Config::apply_env_overrides(Config::default(), env(&[("PORT", "http")]));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
[server]
port = 9000

[session]
data_dir = "/var/lib/wagate"
exit_on_logout = false

[whatsapp]
device_name = "Railway-Bot"
ping_reply = false
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.session.data_dir, PathBuf::from("/var/lib/wagate"));
        assert!(!config.session.exit_on_logout);
        assert_eq!(config.whatsapp.device_name, "Railway-Bot");
        assert!(!config.whatsapp.ping_reply);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert!(config.server.port > 0);
    }

    #[test]
    fn test_load_from_missing_path() {
        assert!(Config::load_from_path("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_to_toml_redacts_token() {
        let mut config = Config::default();
        config.auth.token = SecretString::new("top-secret");
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("top-secret"));
    }
}
