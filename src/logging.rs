//! Logger initialisation
//!
//! Everything in the crate logs through the `log` facade. The binary (or an
//! embedding application) calls [`init_logging`] once to install
//! `env_logger` with the configured filter.
//!
//! Filter precedence: an explicit `[logging] level`, then `RUST_LOG`, then
//! `info`.

use env_logger::{Builder, Env};
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use std::sync::Once;

static INIT: Once = Once::new();

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    /// Case-insensitive; accepts `warning` for `warn`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "off" | "none" => Some(LogLevel::Off),
            _ => None,
        }
    }

    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

/// Whether log lines carry ANSI colours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogWriteStyle {
    #[default]
    Auto,
    Always,
    Never,
}

impl From<LogWriteStyle> for env_logger::WriteStyle {
    fn from(style: LogWriteStyle) -> Self {
        match style {
            LogWriteStyle::Auto => env_logger::WriteStyle::Auto,
            LogWriteStyle::Always => env_logger::WriteStyle::Always,
            LogWriteStyle::Never => env_logger::WriteStyle::Never,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    pub write_style: LogWriteStyle,
}

impl LoggingConfig {
    /// Config with `level` forced, as the `--debug` flag does.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// The filter string `init_logging` will use, given the value of
/// `RUST_LOG` (if any).
pub fn effective_filter(config: &LoggingConfig, rust_log: Option<&str>) -> String {
    match (config.level, rust_log) {
        (Some(level), _) => level.as_str().to_string(),
        (None, Some(env)) if !env.trim().is_empty() => env.to_string(),
        (None, _) => LogLevel::Info.as_str().to_string(),
    }
}

/// Installs `env_logger`. Only the first call in a process has any
/// effect; returns whether this call installed the logger.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let mut builder = Builder::from_env(Env::default().default_filter_or(LogLevel::Info.as_str()));
        if let Some(level) = config.level {
            builder.filter_level(level.to_level_filter());
        }
        builder.write_style(config.write_style.into());
        builder.format_timestamp_millis();
        // Another logger may already be installed by an embedding application
        installed = builder.try_init().is_ok();
    });
    if installed {
        debug!(
            "logger installed (filter {})",
            effective_filter(config, std::env::var("RUST_LOG").ok().as_deref())
        );
    }
    installed
}
