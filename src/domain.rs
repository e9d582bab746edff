//! Domain module - Core business logic and entities
//!
//! This module contains the source entity, run events, and the service
//! seams the check engine depends on.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod events;
pub mod repositories;
pub mod services;
pub mod source;

// Re-export commonly used items for convenience
pub use events::{CheckEvent, CheckProgress, CheckRunStatus, CheckSummary};
pub use repositories::SourceRepository;
pub use services::{
    ProbeError, ProbeHit, ProbeOutcome, ProgressObserver, ScriptEvaluator, SourceProber,
};
pub use source::{
    ContentSource, FindRule, ProbeTarget, INVALIDATED_ORDER_BASE, INVALID_SOURCE_TAG,
    SEARCH_KEYWORD_PLACEHOLDER,
};
