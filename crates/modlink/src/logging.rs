use std::str::FromStr;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Environment override for the log level, e.g. `MODLINK_LOG=debug`.
/// Wins over `--log-level`; an unparsable value falls back to the flag.
const LOG_ENV_VAR: &str = "MODLINK_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logs go to stderr so `--format raw` payloads on stdout stay clean.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let filter = resolve_level(env_value.as_deref(), level);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(filter)
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

fn resolve_level(env_value: Option<&str>, flag: LogLevel) -> LevelFilter {
    env_value
        .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        .unwrap_or_else(|| flag.into())
}
