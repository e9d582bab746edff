//! Event types emitted while a check run executes
//!
//! Progress events are derived from claim indices and are monotonically
//! non-decreasing; delivery is at-least-once, so subscribers must tolerate
//! duplicates. Exactly one terminal event is emitted per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckRunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl CheckRunStatus {
    /// Terminal states end a run; `Idle` and `Running` do not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for CheckRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress snapshot carried by every progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
    pub status: CheckRunStatus,
    pub timestamp: DateTime<Utc>,
}

impl CheckProgress {
    #[must_use]
    pub fn new(current: usize, total: usize, status: CheckRunStatus) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        Self {
            current,
            total,
            percentage,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Final accounting of a run, carried by the terminal event and returned
/// from the run task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub run_id: Uuid,
    pub status: CheckRunStatus,
    /// Final reported count; equals `total` unless the run was cancelled.
    pub checked: usize,
    pub total: usize,
    /// Sources flagged invalid and persisted during this run.
    pub flagged: usize,
    /// Previously flagged sources that probed healthy and were restored.
    pub restored: usize,
    /// Sources without a usable probe target.
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CheckSummary {
    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Events published on the run's broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckEvent {
    Progress(CheckProgress),
    Terminated(CheckSummary),
}
