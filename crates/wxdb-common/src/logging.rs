//! Logging configuration and initialization
//!
//! Every WXDB process logs to the console at the configured level. When a log
//! directory is set, warnings and errors are additionally written to a daily
//! rolling file named after the component (`harvester.2024-01-18.log`,
//! `parser.2024-01-18.log`), so operators can scan one file per process for
//! the things that need attention.
//!
//! Use the `tracing` macros with structured fields:
//!
//! ```rust
//! use tracing::warn;
//!
//! let path = "/data/2023/010010-99999-2023.op";
//! warn!(path = %path, "File vanished before it could be parsed");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wxdb_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env("harvester").unwrap();
//! let _guard = init_logging(&config).unwrap();
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Extension of the daily warning log files
const LOG_FILE_SUFFIX: &str = "log";

/// Log level for filtering console messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration for one process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Component name, used as the log file prefix
    pub component: String,

    /// Minimum console level
    pub level: LogLevel,

    /// Console format
    pub format: LogFormat,

    /// Directory for the warning log; `None` disables the file
    pub log_dir: Option<PathBuf>,

    /// Extra filter directives, e.g. `sqlx=warn,suppaftp=info`
    pub filter_directives: Option<String>,
}

impl LogConfig {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            level: LogLevel::Info,
            format: LogFormat::Text,
            log_dir: Some(PathBuf::from("./logs")),
            filter_directives: None,
        }
    }

    /// Load configuration from environment variables
    ///
    /// - `LOG_LEVEL`: console level (trace, debug, info, warn, error)
    /// - `LOG_FORMAT`: text or json
    /// - `LOG_DIR`: directory for warning logs; `none` disables file output
    /// - `LOG_FILTER`: additional filter directives
    pub fn from_env(component: &str) -> Result<Self> {
        let mut config = Self::new(component);

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = match dir.trim() {
                "" | "none" => None,
                dir => Some(PathBuf::from(dir)),
            };
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Prefix of the daily log file, e.g. `harvester` -> `harvester.2024-01-18.log`
    pub fn file_prefix(&self) -> String {
        self.component.clone()
    }

    /// Daily rolling appender for the warning log in `dir`
    fn file_appender(&self, dir: &Path) -> Result<RollingFileAppender> {
        std::fs::create_dir_all(dir).context("Failed to create log directory")?;
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.file_prefix())
            .filename_suffix(LOG_FILE_SUFFIX)
            .build(dir)
            .context("Failed to create log file appender")
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level.to_tracing_level()).into())
            .from_env_lossy();

        if let Some(ref directives) = self.filter_directives {
            for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .trim()
                        .parse()
                        .context("Failed to parse filter directive")?,
                );
            }
        }

        Ok(filter)
    }
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let console = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    }
    .with_filter(config.env_filter()?);

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = config.file_appender(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(LevelFilter::WARN);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
