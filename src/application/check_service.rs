//! Run lifecycle management
//!
//! `SourceCheckService` owns the collaborators and at most one active run.
//! Consumers start and cancel runs here, query the run status, and
//! subscribe to the event channel; the engine itself stays internal.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::check_engine::{CheckEngine, CheckEngineConfig, RunState};
use crate::domain::events::{CheckEvent, CheckRunStatus, CheckSummary};
use crate::domain::repositories::SourceRepository;
use crate::domain::services::{ProgressObserver, ScriptEvaluator, SourceProber};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ActiveRun {
    state: Arc<RunState>,
    handle: JoinHandle<CheckSummary>,
}

/// Facade over the check engine. One service instance can execute many runs
/// over its lifetime, but never more than one at a time.
pub struct SourceCheckService {
    repository: Arc<dyn SourceRepository>,
    engine: CheckEngine,
    observer: Arc<dyn ProgressObserver>,
    config: CheckEngineConfig,
    events: broadcast::Sender<CheckEvent>,
    active: Mutex<Option<ActiveRun>>,
}

impl SourceCheckService {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        prober: Arc<dyn SourceProber>,
        evaluator: Arc<dyn ScriptEvaluator>,
        observer: Arc<dyn ProgressObserver>,
        config: CheckEngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let engine = CheckEngine::new(
            Arc::clone(&repository),
            prober,
            evaluator,
            config.clone(),
        );
        Self {
            repository,
            engine,
            observer,
            config,
            events,
            active: Mutex::new(None),
        }
    }

    /// Starts a check run over the currently stored sources.
    ///
    /// Returns the id of the started run, or of the already-active run when
    /// one is still executing. A fresh run begins once the previous one has
    /// reached its terminal state.
    pub async fn start(&self) -> Result<Uuid> {
        let mut active = self.active.lock().await;

        // 중복 실행 방지
        if let Some(run) = active.as_ref() {
            if run.state.terminal_status().is_none() {
                info!("check run {} already active, ignoring start", run.state.run_id());
                return Ok(run.state.run_id());
            }
        }

        let sources = self
            .repository
            .list_all()
            .await
            .context("loading sources for check run")?;
        let state = Arc::new(RunState::new(
            sources,
            self.config.worker_count,
            self.events.clone(),
            Arc::clone(&self.observer),
            CancellationToken::new(),
        ));
        let run_id = state.run_id();

        let engine = self.engine.clone();
        let run_state = Arc::clone(&state);
        let handle = tokio::spawn(async move { engine.run(run_state).await });

        *active = Some(ActiveRun { state, handle });
        Ok(run_id)
    }

    /// Cancels the active run. The terminal action fires immediately;
    /// workers drain cooperatively afterwards. Without an active,
    /// non-terminal run this is a no-op.
    pub async fn cancel(&self) {
        let active = self.active.lock().await;
        let Some(run) = active.as_ref() else {
            debug!("cancel requested with no active run");
            return;
        };
        if run.state.terminal_status().is_some() {
            debug!("cancel requested after run {} terminated", run.state.run_id());
            return;
        }
        info!("🛑 cancelling check run {}", run.state.run_id());
        run.state.cancel();
        run.state.fire_terminal(CheckRunStatus::Cancelled).await;
    }

    /// Current lifecycle state: `Idle` without a held run, otherwise the
    /// run's status.
    pub async fn status(&self) -> CheckRunStatus {
        match self.active.lock().await.as_ref() {
            None => CheckRunStatus::Idle,
            Some(run) => run
                .state
                .terminal_status()
                .unwrap_or(CheckRunStatus::Running),
        }
    }

    /// Waits for the held run to finish and returns its summary, releasing
    /// the slot. Returns `None` when no run is held.
    pub async fn wait(&self) -> Result<Option<CheckSummary>> {
        let taken = self.active.lock().await.take();
        let Some(run) = taken else {
            return Ok(None);
        };
        let summary = run.handle.await.context("check run task failed")?;
        Ok(Some(summary))
    }

    /// New receiver on the run event channel. Slow receivers may observe
    /// `Lagged` and should resubscribe or skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<CheckEvent> {
        self.events.subscribe()
    }

    /// The event channel as a `Stream`.
    pub fn event_stream(&self) -> BroadcastStream<CheckEvent> {
        BroadcastStream::new(self.subscribe())
    }
}
