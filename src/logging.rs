//! Logging setup
//!
//! Always logs to stderr, as text or JSON lines. In debug mode, or when a log directory is configured,
//! also writes a daily-rolling file through a non-blocking appender; the
//! returned guard must live as long as the process.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "wagate.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    debug_mode: bool,
    json: bool,
    log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            debug_mode: false,
            json: false,
            log_dir: None,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Debug mode forces `debug` level and file logging.
    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    /// JSON lines on stderr, for log collectors.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    fn effective_level(&self) -> &str {
        if self.debug_mode { "debug" } else { &self.level }
    }

    fn file_dir(&self) -> Option<PathBuf> {
        match (&self.log_dir, self.debug_mode) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(default_log_dir()),
            (None, false) => None,
        }
    }

    /// `LOG_LEVEL` wins; `RUST_LOG` is only consulted when the level is unusable.
    fn filter(&self) -> EnvFilter {
        let level = self.effective_level();
        // Quiet the protocol client's per-frame chatter unless explicitly asked for.
        let directives = format!("{level},whatsapp_rust=warn,wacore=warn");
        EnvFilter::try_new(&directives)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

/// Install the global subscriber. Returns the file appender guard, if any.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(config.filter())
            .boxed()
    };

    let Some(dir) = config.file_dir() else {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .try_init()
            .context("Failed to set global subscriber")?;
        return Ok(None);
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(config.filter());

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set global subscriber")?;

    Ok(Some(guard))
}

/// Remove rolled log files older than `max_age_days` from the directory
/// `config` writes to. Nothing to do when file logging is off.
pub fn cleanup_old_logs(config: &LogConfig, max_age_days: u64) -> Result<usize> {
    match config.file_dir() {
        Some(dir) => cleanup_logs_in(&dir, max_age_days),
        None => Ok(0),
    }
}

fn cleanup_logs_in(dir: &Path, max_age_days: u64) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if now.duration_since(modified).unwrap_or_default() > max_age {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_mode_overrides_level() {
        let config = LogConfig::new().with_level("warn").with_debug_mode(true);
        assert_eq!(config.effective_level(), "debug");
        assert_eq!(config.file_dir(), Some(default_log_dir()));
    }

    #[test]
    fn test_no_file_without_dir_or_debug() {
        let config = LogConfig::new().with_level("error");
        assert_eq!(config.effective_level(), "error");
        assert!(config.file_dir().is_none());
    }

    #[test]
    fn test_explicit_dir_wins() {
        let config = LogConfig::new().with_log_dir(PathBuf::from("/tmp/wagate-logs"));
        assert_eq!(config.file_dir(), Some(PathBuf::from("/tmp/wagate-logs")));
    }

    #[test]
    fn test_cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wagate.log.2026-01-01"), "x").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let removed = cleanup_logs_in(dir.path(), 7).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("wagate.log.2026-01-01").exists());
    }

    #[test]
    fn test_cleanup_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{LOG_FILE_PREFIX}.2020-01-01"));
        let fresh = dir.path().join(format!("{LOG_FILE_PREFIX}.2099-01-01"));
        let other = dir.path().join("notes.txt");
        for path in [&stale, &fresh, &other] {
            std::fs::write(path, "x").unwrap();
        }
        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
        for path in [&stale, &other] {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(ten_days_ago)
                .unwrap();
        }

        let config = LogConfig::new().with_log_dir(dir.path().to_path_buf());
        assert_eq!(cleanup_old_logs(&config, 7).unwrap(), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_cleanup_without_file_logging() {
        assert_eq!(cleanup_old_logs(&LogConfig::new(), 7).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        assert_eq!(cleanup_logs_in(Path::new("/no/such/dir"), 7).unwrap(), 0);
    }
}
