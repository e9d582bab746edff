//! Sourcecheck - bulk health checking for stored content sources
//!
//! Revalidates a collection of remote content source configurations with a
//! bounded worker pool: every source is probed once per run under a hard
//! timeout, outcomes are reconciled back into the store (flagging dead
//! sources, restoring revived ones), and progress is reported while the
//! run executes. Runs are cancellable and always end in exactly one
//! terminal event.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the public surface for easier access
pub use application::{CheckEngineConfig, SourceCheckService};
pub use domain::events::{CheckEvent, CheckProgress, CheckRunStatus, CheckSummary};
pub use domain::source::ContentSource;
