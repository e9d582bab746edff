//! Logging system configuration and initialization
//!
//! This module provides the logging setup for the checker:
//! - Console output for interactive runs
//! - Daily-rolling file output under the app data directory
//! - Configuration file based log level control
//! - KST (Korea Standard Time) timestamps

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Utc};
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::infrastructure::config::ConfigManager;
// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "sourcecheck.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Custom time formatter for KST (Korea Standard Time, UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst_offset = FixedOffset::east_opt(9 * 3600).expect("valid UTC+9 offset");
        let kst_time = Utc::now().with_timezone(&kst_offset);
        write!(w, "{}", kst_time.format("%Y-%m-%d %H:%M:%S%.3f %Z"))
    }
}

/// Log directory inside the app data dir, falling back to ./logs when the
/// platform data dir is unavailable.
pub fn get_log_directory() -> PathBuf {
    ConfigManager::get_app_data_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Initialize logging with custom configuration.
///
/// `RUST_LOG` overrides the configured level entirely. Below `trace`,
/// chatty dependency targets (sqlx, reqwest internals, tokio) are pinned
/// down so application logs stay readable.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);
        if !config.level.to_lowercase().contains("trace") {
            filter = filter
                .add_directive("sqlx::query=warn".parse().expect("valid directive"))
                .add_directive("sqlx=info".parse().expect("valid directive"))
                .add_directive("reqwest=info".parse().expect("valid directive"))
                .add_directive("hyper=warn".parse().expect("valid directive"))
                .add_directive("h2=warn".parse().expect("valid directive"))
                .add_directive("tokio=info".parse().expect("valid directive"))
                .add_directive(
                    format!("sourcecheck={}", config.level)
                        .parse()
                        .expect("valid directive"),
                );
        }
        filter
    });

    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, true) => {
            let file_writer = file_writer()?;
            // File layer with minimal formatting (time + level + message only)
            let file_layer = fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .with_ansi(false);
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(KstTimeFormatter)
                .with_target(false);
            registry.with(file_layer).with(console_layer).init();
        }
        (true, false) => {
            let file_writer = file_writer()?;
            let file_layer = fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .with_ansi(false);
            registry.with(file_layer).init();
        }
        (false, true) => {
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(KstTimeFormatter)
                .with_target(false);
            registry.with(console_layer).init();
        }
        (false, false) => {
            // Nothing requested; keep the subscriber so level filtering
            // still applies to spans created by libraries.
            registry.init();
        }
    }

    Ok(())
}

fn file_writer() -> Result<non_blocking::NonBlocking> {
    let log_dir = get_log_directory();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow!("failed to create log directory {:?}: {}", log_dir, e))?;
    let appender = rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(appender);
    // Store the guard globally to prevent it from being dropped
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("log guard mutex poisoned"))?
        .push(guard);
    Ok(writer)
}
