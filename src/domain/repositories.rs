//! Repository interface for stored content sources
//!
//! The checker reads the whole collection once per run and writes records
//! back one at a time as probes reconcile.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::source::ContentSource;

#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// All stored sources in their persisted order (order key, then id).
    async fn list_all(&self) -> Result<Vec<ContentSource>>;

    /// Inserts the record or replaces the stored one with the same id.
    async fn upsert(&self, source: &ContentSource) -> Result<()>;
}
