//! Check run execution
//!
//! Drives a fixed pool of workers over an immutable snapshot of the stored
//! sources. Workers claim indices from a shared atomic cursor, probe the
//! claimed source, reconcile the outcome into the record, and report
//! progress derived from the claim index. The worker that claims index
//! `total + workers - 1` performs the terminal action; exactly one claim
//! satisfies that predicate.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::{CheckEvent, CheckProgress, CheckRunStatus, CheckSummary};
use crate::domain::repositories::SourceRepository;
use crate::domain::services::{
    ProbeError, ProbeOutcome, ProgressObserver, ScriptEvaluator, SourceProber,
};
use crate::domain::source::{ContentSource, INVALIDATED_ORDER_BASE, INVALID_SOURCE_TAG, ProbeTarget};

/// Tuning knobs for a check run.
#[derive(Debug, Clone)]
pub struct CheckEngineConfig {
    /// Number of concurrent workers. Clamped to at least 1.
    pub worker_count: usize,
    /// Hard upper bound for one probe, enforced on top of whatever the
    /// prober does internally.
    pub probe_timeout: Duration,
    /// Tag used to flag unhealthy sources.
    pub invalid_tag: String,
}

impl Default for CheckEngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 6,
            probe_timeout: Duration::from_secs(60),
            invalid_tag: INVALID_SOURCE_TAG.to_string(),
        }
    }
}

/// Shared state of one run. Created when the run starts and dropped with
/// it; never reused across runs.
pub(crate) struct RunState {
    run_id: Uuid,
    sources: Vec<ContentSource>,
    total: usize,
    worker_count: usize,
    cursor: AtomicUsize,
    reported: AtomicUsize,
    flagged: AtomicUsize,
    restored: AtomicUsize,
    skipped: AtomicUsize,
    terminal: OnceLock<CheckSummary>,
    cancellation: CancellationToken,
    started_at: DateTime<Utc>,
    events: broadcast::Sender<CheckEvent>,
    observer: Arc<dyn ProgressObserver>,
}

impl RunState {
    pub(crate) fn new(
        sources: Vec<ContentSource>,
        worker_count: usize,
        events: broadcast::Sender<CheckEvent>,
        observer: Arc<dyn ProgressObserver>,
        cancellation: CancellationToken,
    ) -> Self {
        let total = sources.len();
        Self {
            run_id: Uuid::new_v4(),
            sources,
            total,
            worker_count: worker_count.max(1),
            cursor: AtomicUsize::new(0),
            reported: AtomicUsize::new(0),
            flagged: AtomicUsize::new(0),
            restored: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            terminal: OnceLock::new(),
            cancellation,
            started_at: Utc::now(),
            events,
            observer,
        }
    }

    pub(crate) fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn source(&self, idx: usize) -> &ContentSource {
        &self.sources[idx]
    }

    /// Hands out the next index. No bound check happens here: indices at or
    /// past `total` are returned as-is and interpreted by the caller.
    fn claim(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancellation.cancel();
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn terminal_status(&self) -> Option<CheckRunStatus> {
        self.terminal.get().map(|summary| summary.status)
    }

    fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn record_flag(&self) {
        self.flagged.fetch_add(1, Ordering::SeqCst);
    }

    fn record_restore(&self) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }

    /// Emits the initial `(0, total)` report when a run starts.
    async fn report_started(&self) {
        let progress = CheckProgress::new(0, self.total, CheckRunStatus::Running);
        let _ = self.events.send(CheckEvent::Progress(progress));
        self.observer.on_progress(0, self.total).await;
    }

    /// Reports progress for a finished claim index.
    ///
    /// The reported count is `idx - workers + 1`, the number of items no
    /// longer in flight once index `idx` is done. Indices below the worker
    /// count carry no information and are not reported. A `fetch_max` latch
    /// keeps the published count monotonic even when workers finish out of
    /// claim order.
    async fn report_progress(&self, idx: usize) {
        if idx < self.worker_count || self.terminal.get().is_some() {
            return;
        }
        let value = idx - self.worker_count + 1;
        let previous = self.reported.fetch_max(value, Ordering::SeqCst);
        let current = value.max(previous);
        let progress = CheckProgress::new(current, self.total, CheckRunStatus::Running);
        let _ = self.events.send(CheckEvent::Progress(progress));
        self.observer.on_progress(current, self.total).await;
    }

    /// Performs the terminal action once. Returns false when another caller
    /// already terminated the run.
    pub(crate) async fn fire_terminal(&self, status: CheckRunStatus) -> bool {
        let summary = self.build_summary(status);
        if self.terminal.set(summary.clone()).is_err() {
            return false;
        }
        let _ = self.events.send(CheckEvent::Terminated(summary.clone()));
        self.observer.on_terminal(status).await;
        info!(
            "🏁 check run {} {}: {}/{} checked, {} flagged, {} restored, {} skipped",
            self.run_id,
            status,
            summary.checked,
            summary.total,
            summary.flagged,
            summary.restored,
            summary.skipped
        );
        true
    }

    fn terminal_summary(&self) -> Option<CheckSummary> {
        self.terminal.get().cloned()
    }

    fn build_summary(&self, status: CheckRunStatus) -> CheckSummary {
        CheckSummary {
            run_id: self.run_id,
            status,
            checked: self.reported.load(Ordering::SeqCst),
            total: self.total,
            flagged: self.flagged.load(Ordering::SeqCst),
            restored: self.restored.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// What a dispatched probe came back as.
enum Dispatch {
    /// Probe ran to a result, healthy or not.
    Finished(Result<ProbeOutcome, ProbeError>),
    /// The rule produced no usable URL; the source is left untouched.
    Skipped,
    /// Cancellation interrupted the probe; the partial result is discarded.
    Abandoned,
}

/// Executes one check run over a source snapshot.
#[derive(Clone)]
pub(crate) struct CheckEngine {
    repository: Arc<dyn SourceRepository>,
    prober: Arc<dyn SourceProber>,
    evaluator: Arc<dyn ScriptEvaluator>,
    config: CheckEngineConfig,
}

impl CheckEngine {
    pub(crate) fn new(
        repository: Arc<dyn SourceRepository>,
        prober: Arc<dyn SourceProber>,
        evaluator: Arc<dyn ScriptEvaluator>,
        config: CheckEngineConfig,
    ) -> Self {
        Self {
            repository,
            prober,
            evaluator,
            config,
        }
    }

    /// Runs the worker pool to completion and returns the run summary.
    pub(crate) async fn run(&self, state: Arc<RunState>) -> CheckSummary {
        if state.total() == 0 {
            state.fire_terminal(CheckRunStatus::Completed).await;
            return state
                .terminal_summary()
                .unwrap_or_else(|| state.build_summary(CheckRunStatus::Completed));
        }

        info!(
            "🚀 check run {} started: {} sources, {} workers, {:?} probe budget",
            state.run_id(),
            state.total(),
            state.worker_count(),
            self.config.probe_timeout
        );
        state.report_started().await;

        let handles: Vec<_> = (0..state.worker_count())
            .map(|worker_id| {
                let engine = self.clone();
                let state = Arc::clone(&state);
                tokio::spawn(async move { engine.worker_loop(worker_id, state).await })
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!("check worker task failed: {err}");
            }
        }

        state
            .terminal_summary()
            .unwrap_or_else(|| state.build_summary(CheckRunStatus::Completed))
    }

    async fn worker_loop(&self, worker_id: usize, state: Arc<RunState>) {
        loop {
            let idx = state.claim();
            if state.is_cancelled() {
                debug!("worker {worker_id} stopping at claim {idx}: run cancelled");
                break;
            }
            if idx >= state.total() {
                state.report_progress(idx).await;
                if idx + 1 >= state.total() + state.worker_count() {
                    state.fire_terminal(CheckRunStatus::Completed).await;
                }
                break;
            }

            let source = state.source(idx).clone();
            let Some(target) = source.probe_target() else {
                debug!("skipping '{}': no probe target", source.name);
                state.record_skip();
                state.report_progress(idx).await;
                continue;
            };

            match self.dispatch(&state, &source, &target).await {
                Dispatch::Abandoned => {
                    debug!("worker {worker_id} abandoning '{}': run cancelled", source.name);
                    break;
                }
                Dispatch::Skipped => {
                    state.record_skip();
                    state.report_progress(idx).await;
                }
                Dispatch::Finished(result) => {
                    self.reconcile(&state, source, idx, result).await;
                    state.report_progress(idx).await;
                }
            }
        }
    }

    /// Resolves the target and races the probe against cancellation and the
    /// probe budget. Dropping the probe future aborts the transport, so a
    /// cancelled or expired probe does not leak the underlying request.
    async fn dispatch(
        &self,
        state: &RunState,
        source: &ContentSource,
        target: &ProbeTarget,
    ) -> Dispatch {
        let url = match target.resolve(self.evaluator.as_ref(), &source.base_url).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("skipping '{}': rule has no usable segment", source.name);
                return Dispatch::Skipped;
            }
            Err(err) => return Dispatch::Finished(Err(err)),
        };

        tokio::select! {
            _ = state.cancel_token().cancelled() => Dispatch::Abandoned,
            result = tokio::time::timeout(
                self.config.probe_timeout,
                self.prober.probe(&url, &source.base_url, self.config.probe_timeout),
            ) => match result {
                Ok(outcome) => Dispatch::Finished(outcome),
                Err(_) => Dispatch::Finished(Err(ProbeError::Timeout)),
            },
        }
    }

    /// Folds a probe result back into the stored record.
    ///
    /// Healthy and unmarked records are left alone. Healthy and marked
    /// records lose the marker. Anything unhealthy gains the marker and is
    /// demoted to the end of the ordering by its claim index. Persistence
    /// failures are contained here; they never end the run.
    async fn reconcile(
        &self,
        state: &RunState,
        mut source: ContentSource,
        idx: usize,
        result: Result<ProbeOutcome, ProbeError>,
    ) {
        let tag = self.config.invalid_tag.as_str();
        match result {
            Ok(outcome) if !outcome.is_empty() => {
                debug!("'{}' healthy: {} hits", source.name, outcome.hit_count());
                if source.clear_invalid(tag) {
                    match self.repository.upsert(&source).await {
                        Ok(()) => state.record_restore(),
                        Err(err) => {
                            warn!("failed to persist restored source '{}': {err:#}", source.id);
                        }
                    }
                }
            }
            other => {
                match &other {
                    Ok(_) => debug!("'{}' returned no results", source.name),
                    Err(err) => debug!("'{}' probe failed: {err}", source.name),
                }
                source.mark_invalid(tag, INVALIDATED_ORDER_BASE + idx as i64);
                match self.repository.upsert(&source).await {
                    Ok(()) => state.record_flag(),
                    Err(err) => {
                        warn!("failed to persist flagged source '{}': {err:#}", source.id);
                    }
                }
            }
        }
    }
}
