//! Application layer module
//!
//! This module contains the check engine and the service facade that
//! orchestrate the domain logic.

pub mod check_engine;
pub mod check_service;

pub use check_engine::CheckEngineConfig;
pub use check_service::SourceCheckService;
