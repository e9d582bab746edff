//! Log-based progress indicator
//!
//! The CLI surfaces run progress through the log stream. Duplicate
//! deliveries are expected on the observer seam, so repeated counts are
//! dropped here instead of being logged twice.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::domain::events::CheckRunStatus;
use crate::domain::services::ProgressObserver;

pub struct LogProgressReporter {
    last_logged: AtomicUsize,
}

impl LogProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_logged: AtomicUsize::new(usize::MAX),
        }
    }
}

impl Default for LogProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressObserver for LogProgressReporter {
    async fn on_progress(&self, current: usize, total: usize) {
        if self.last_logged.swap(current, Ordering::SeqCst) == current {
            return;
        }
        let percentage = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        info!("checked {current}/{total} sources ({percentage:.0}%)");
    }

    async fn on_terminal(&self, status: CheckRunStatus) {
        match status {
            CheckRunStatus::Completed => info!("✅ source check completed"),
            CheckRunStatus::Cancelled => info!("🛑 source check cancelled"),
            other => info!("source check ended: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_counts_are_swallowed() {
        let reporter = LogProgressReporter::new();
        // First delivery always passes the latch, duplicates do not.
        assert_ne!(reporter.last_logged.swap(3, Ordering::SeqCst), 3);
        assert_eq!(reporter.last_logged.swap(3, Ordering::SeqCst), 3);
        reporter.on_progress(4, 10).await;
        assert_eq!(reporter.last_logged.load(Ordering::SeqCst), 4);
    }
}
