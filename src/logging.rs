// src/logging.rs

//! Logging setup built on `tracing` + `tracing-subscriber`.

use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` flag is given.
pub const LOG_ENV_VAR: &str = "DAGRUN_LOG";

/// Install the global subscriber. Call once, before any workflow work;
/// a second call panics inside `tracing-subscriber`.
pub fn init_logging(cli_level: Option<LogLevel>) {
    fmt()
        .with_max_level(resolve_level(cli_level))
        .with_target(true)
        .init();
}

/// Pick the effective level: the CLI flag wins, then `DAGRUN_LOG`, then
/// `info`. An unparseable env value falls back to `info` rather than
/// failing startup.
fn resolve_level(cli_level: Option<LogLevel>) -> Level {
    if let Some(lvl) = cli_level {
        return match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        };
    }

    std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|raw| raw.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}
