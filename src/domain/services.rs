//! Service seams used by the check engine
//!
//! The engine only talks to the outside world through these traits: probing
//! a URL, evaluating a scripted rule, and surfacing progress to whoever is
//! watching the run.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::CheckRunStatus;

/// One entry a probe found on the remote site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub title: String,
    pub url: String,
}

/// Result of a successfully transported probe. Zero hits means the source
/// answered but returned nothing usable, which the checker treats as
/// unhealthy.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub hits: Vec<ProbeHit>,
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }
}

/// Ways a probe can fail. Zero hits is not a failure (it is an empty
/// [`ProbeOutcome`]) and a missing probe target is not a failure either
/// (the checker skips the source).
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("script evaluation failed: {0}")]
    ScriptEvaluation(String),
}

/// Issues one probe request against a resolved URL.
///
/// Implementations must honor `timeout` as an upper bound for the whole
/// exchange; the engine additionally enforces the same bound from outside.
#[async_trait]
pub trait SourceProber: Send + Sync {
    async fn probe(
        &self,
        url: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// Evaluates a scripted find rule to its textual result. The source's base
/// URL is bound into the evaluation context.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(&self, expression: &str, base_url: &str) -> Result<String>;
}

/// Receives user-facing progress while a run executes.
///
/// Delivery is at-least-once: `on_progress` may repeat a count and
/// `on_terminal` may be invoked with the same status more than once across
/// retries, so implementations must treat duplicates as no-ops.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_progress(&self, _current: usize, _total: usize) {}

    async fn on_terminal(&self, _status: CheckRunStatus) {}
}
