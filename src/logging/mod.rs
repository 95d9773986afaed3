//! Logging configuration and initialization
//!
//! The state heap reports allocation, eviction and reclaim decisions through
//! `tracing`. This module installs a subscriber for binaries and tests that
//! want to see them.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "renderheap=trace")
//! - `RENDERHEAP_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `RENDERHEAP_LOG_FORMAT`: Output format ("human" or "json")
//! - `RENDERHEAP_LOG_FILE`: Optional file path for log output (always JSON)

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Set once the global subscriber is installed
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "RENDERHEAP_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "RENDERHEAP_LOG_FORMAT";
const LOG_FILE_ENV: &str = "RENDERHEAP_LOG_FILE";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("failed to create log directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("failed to open log file: {0}")]
    FileOpenFailed(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    /// Default: only failed allocations and heap growth warnings
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse from string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file/line in events
    pub with_file_info: bool,
    /// Emit span close events (with timing)
    pub with_span_events: bool,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Build a configuration from the `RENDERHEAP_*` environment variables
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or_default();

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        let mut config = LoggingConfig::new().with_level(level).with_format(format);
        if let Ok(file) = std::env::var(LOG_FILE_ENV) {
            config = config.with_log_file(PathBuf::from(file));
        }
        config
    }
}

/// Initialize logging from the environment, ignoring failures.
///
/// Idempotent: only the first call installs a subscriber.
///
/// # Example
///
/// ```ignore
/// renderheap::logging::init_logging_default();
/// tracing::info!("render context created");
/// ```
pub fn init_logging_default() {
    let _ = init_logging_from_env();
}

/// Initialize logging from environment variables.
///
/// Reads `RUST_LOG`, `RENDERHEAP_LOG_LEVEL`, `RENDERHEAP_LOG_FORMAT` and
/// `RENDERHEAP_LOG_FILE`. Idempotent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_with_config(&LoggingConfig::from_env())
}

/// Initialize logging with a custom configuration.
///
/// Idempotent. Returns the error of the first, failed, initialization
/// attempt; later calls after a success are no-ops.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    TRACING_INITIALIZED
        .get_or_try_init(|| init_with_config_internal(config))
        .map(|_| ())
}

fn init_with_config_internal(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(config.level)?;

    let file = match &config.log_file {
        Some(path) => Some(open_log_file(path)?),
        None => None,
    };

    // File output is always JSON so it can be aggregated. It sits directly
    // on the filter so both console formats stack on the same subscriber.
    let file_layer = file.map(|file| {
        fmt::layer()
            .json()
            .with_writer(file)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_span_events(span_events(config.with_span_events))
    });

    match config.format {
        LogFormat::Json => {
            let console = fmt::layer()
                .json()
                .with_target(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info)
                .with_span_events(span_events(config.with_span_events));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console)
                .try_init()
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;
        }
        LogFormat::Human => {
            let console = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info)
                .with_span_events(span_events(config.with_span_events));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console)
                .try_init()
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;
        }
    }

    Ok(())
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn open_log_file(log_path: &Path) -> Result<std::fs::File, LoggingError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoggingError::DirectoryCreationFailed(e.to_string()))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| LoggingError::FileOpenFailed(e.to_string()))
}

/// Build the filter: `RUST_LOG` first, then `RENDERHEAP_LOG_LEVEL`, then the
/// configured default.
fn build_env_filter(default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log).map_err(|e| LoggingError::InvalidFilter(e.to_string()));
    }

    if let Some(level) = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|s| LogLevel::parse(&s))
    {
        return Ok(EnvFilter::new(level.as_filter_str()));
    }

    Ok(EnvFilter::new(default_level.as_filter_str()))
}

/// Check if tracing has been initialized by this module
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_logging_default_idempotent() {
        init_logging_default();
        init_logging_default();
        init_logging_default();
        // Another test binary component may already own the global
        // subscriber, in which case our flag stays unset.
        let _ = is_initialized();
    }

    #[test]
    #[serial]
    fn test_human_console_with_log_file() {
        let path = std::env::temp_dir()
            .join("renderheap-logging")
            .join("human.log");
        let config = LoggingConfig::new()
            .with_format(LogFormat::Human)
            .with_log_file(path);

        // first initializer wins; a prior init makes this a no-op
        assert!(init_with_config(&config).is_ok());
        assert!(is_initialized());
        tracing::warn!("human console plus json file");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("human"), Some(LogFormat::Human));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Human));
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("structured"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_format(LogFormat::Json)
            .with_file_info(true)
            .with_span_events(true)
            .with_log_file(PathBuf::from("/tmp/renderheap-test.log"));

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_file_info);
        assert!(config.with_span_events);
        assert_eq!(
            config.log_file,
            Some(PathBuf::from("/tmp/renderheap-test.log"))
        );
    }

    #[test]
    fn test_default_level_is_warn() {
        assert_eq!(LoggingConfig::new().level, LogLevel::Warn);
        assert_eq!(LogLevel::default().as_filter_str(), "warn");
    }

    #[test]
    fn test_log_level_as_tracing_level() {
        assert_eq!(LogLevel::Error.as_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.as_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.as_tracing_level(), tracing::Level::TRACE);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        std::env::set_var(LOG_LEVEL_ENV, "trace");
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::remove_var(LOG_FILE_ENV);

        let config = LoggingConfig::from_env();
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.log_file.is_none());

        std::env::remove_var(LOG_LEVEL_ENV);
        std::env::remove_var(LOG_FORMAT_ENV);
    }
}
