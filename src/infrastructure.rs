//! Infrastructure layer for persistence, probing, and process plumbing
//!
//! This module provides the SQLite store, the HTTP probe implementation,
//! configuration management and logging bootstrap behind the domain seams.

pub mod config; // Configuration constants and helpers
pub mod database_connection;
pub mod http_prober;
pub mod logging; // Logging infrastructure
pub mod progress_log;
pub mod script_evaluator;
pub mod source_repository;

// Re-export commonly used items
pub use config::{AppConfig, CheckerConfig, ConfigManager, LoggingConfig};
pub use database_connection::DatabaseConnection;
pub use http_prober::{HttpProberConfig, HttpSourceProber};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use progress_log::LogProgressReporter;
pub use script_evaluator::DisabledScriptEvaluator;
pub use source_repository::SqliteSourceRepository;
