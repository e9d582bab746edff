//! Tests for the bulk source check run lifecycle
//!
//! Drives `SourceCheckService` end to end over an in-memory repository and
//! scripted probers, covering reconciliation, progress reporting,
//! termination and cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rstest::rstest;
use tokio::sync::{Mutex, broadcast};

use sourcecheck::application::{CheckEngineConfig, SourceCheckService};
use sourcecheck::domain::{
    CheckEvent, CheckProgress, CheckRunStatus, CheckSummary, ContentSource, INVALID_SOURCE_TAG,
    ProbeError, ProbeHit, ProbeOutcome, ProgressObserver, ScriptEvaluator, SourceProber,
    SourceRepository,
};

struct MemoryRepository {
    records: Mutex<HashMap<String, ContentSource>>,
    upserts: Mutex<Vec<ContentSource>>,
}

impl MemoryRepository {
    fn new(sources: Vec<ContentSource>) -> Self {
        let records = sources.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            records: Mutex::new(records),
            upserts: Mutex::new(Vec::new()),
        }
    }

    async fn stored(&self, id: &str) -> ContentSource {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("source {id} not stored"))
    }

    async fn upsert_count(&self) -> usize {
        self.upserts.lock().await.len()
    }
}

#[async_trait]
impl SourceRepository for MemoryRepository {
    async fn list_all(&self) -> Result<Vec<ContentSource>> {
        let mut sources: Vec<ContentSource> =
            self.records.lock().await.values().cloned().collect();
        sources.sort_by(|a, b| a.order_key.cmp(&b.order_key).then(a.id.cmp(&b.id)));
        Ok(sources)
    }

    async fn upsert(&self, source: &ContentSource) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(source.id.clone(), source.clone());
        self.upserts.lock().await.push(source.clone());
        Ok(())
    }
}

/// How the prober should answer for one base URL.
#[derive(Clone, Copy)]
enum Script {
    Hits(usize),
    Empty,
    Fail,
    Hang,
}

/// Answers probes according to a per-base-URL script. Unlisted URLs
/// answer with a single hit.
struct ScriptedProber {
    scripts: HashMap<String, Script>,
}

impl ScriptedProber {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(url, script)| (url.to_string(), script))
                .collect(),
        }
    }

    fn healthy() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl SourceProber for ScriptedProber {
    async fn probe(
        &self,
        url: &str,
        base_url: &str,
        _timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        match self.scripts.get(base_url).copied().unwrap_or(Script::Hits(1)) {
            Script::Hits(count) => Ok(ProbeOutcome {
                hits: (0..count)
                    .map(|i| ProbeHit {
                        title: format!("hit {i}"),
                        url: url.to_string(),
                    })
                    .collect(),
            }),
            Script::Empty => Ok(ProbeOutcome::default()),
            Script::Fail => Err(ProbeError::Transport("connection reset".into())),
            Script::Hang => std::future::pending().await,
        }
    }
}

struct EchoEvaluator;

#[async_trait]
impl ScriptEvaluator for EchoEvaluator {
    async fn evaluate(&self, expression: &str, base_url: &str) -> Result<String> {
        Ok(expression.replace("baseUrl", base_url))
    }
}

struct FailingEvaluator;

#[async_trait]
impl ScriptEvaluator for FailingEvaluator {
    async fn evaluate(&self, _expression: &str, _base_url: &str) -> Result<String> {
        anyhow::bail!("script engine exploded")
    }
}

struct SilentObserver;

#[async_trait]
impl ProgressObserver for SilentObserver {}

fn searchable(id: &str, base_url: &str) -> ContentSource {
    let mut source = ContentSource::new(id, id.to_uppercase(), base_url);
    source.search_url = Some(format!("{base_url}/search?q={{keyword}}"));
    source
}

fn config(worker_count: usize, probe_timeout: Duration) -> CheckEngineConfig {
    CheckEngineConfig {
        worker_count,
        probe_timeout,
        ..CheckEngineConfig::default()
    }
}

fn make_service(
    sources: Vec<ContentSource>,
    prober: ScriptedProber,
    engine_config: CheckEngineConfig,
) -> (SourceCheckService, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::new(sources));
    let service = SourceCheckService::new(
        Arc::clone(&repository) as Arc<dyn SourceRepository>,
        Arc::new(prober),
        Arc::new(EchoEvaluator),
        Arc::new(SilentObserver),
        engine_config,
    );
    (service, repository)
}

/// Drains the event channel until the terminal event arrives.
async fn collect_run_events(
    receiver: &mut broadcast::Receiver<CheckEvent>,
) -> (Vec<CheckProgress>, CheckSummary) {
    let mut progresses = Vec::new();
    loop {
        match receiver.recv().await.expect("event channel closed early") {
            CheckEvent::Progress(progress) => progresses.push(progress),
            CheckEvent::Terminated(summary) => return (progresses, summary),
        }
    }
}

fn assert_monotonic(progresses: &[CheckProgress], total: usize) {
    let mut last = 0;
    for progress in progresses {
        assert!(
            progress.current >= last,
            "progress went backwards: {} after {last}",
            progress.current
        );
        assert!(progress.current <= total);
        assert_eq!(progress.total, total);
        last = progress.current;
    }
}

#[tokio::test]
async fn run_reconciles_mixed_outcomes() {
    // a: healthy but carrying the invalid tag, b: answers empty, c: hangs
    // until the probe budget expires.
    let mut a = searchable("src-a", "https://alpha.example");
    a.add_tag(INVALID_SOURCE_TAG);
    let b = searchable("src-b", "https://beta.example");
    let c = searchable("src-c", "https://gamma.example");

    let prober = ScriptedProber::new(vec![
        ("https://alpha.example", Script::Hits(2)),
        ("https://beta.example", Script::Empty),
        ("https://gamma.example", Script::Hang),
    ]);
    let (service, repository) = make_service(
        vec![a, b, c],
        prober,
        config(2, Duration::from_millis(50)),
    );

    let mut events = service.subscribe();
    service.start().await.expect("start");
    let (progresses, terminal) = collect_run_events(&mut events).await;
    let summary = service.wait().await.expect("wait").expect("summary");

    assert_eq!(summary.status, CheckRunStatus::Completed);
    assert_eq!((summary.checked, summary.total), (3, 3));
    assert_eq!(summary.flagged, 2);
    assert_eq!(summary.restored, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(terminal.run_id, summary.run_id);

    // Healthy source sheds the tag, the failing two gain it and are pushed
    // to the end of the ordering by their claim index.
    let restored = repository.stored("src-a").await;
    assert!(!restored.has_tag(INVALID_SOURCE_TAG));
    assert_eq!(restored.order_key, 0);

    let empty = repository.stored("src-b").await;
    assert!(empty.has_tag(INVALID_SOURCE_TAG));
    assert_eq!(empty.order_key, 10_001);

    let timed_out = repository.stored("src-c").await;
    assert!(timed_out.has_tag(INVALID_SOURCE_TAG));
    assert_eq!(timed_out.order_key, 10_002);

    assert_eq!(repository.upsert_count().await, 3);

    assert_monotonic(&progresses, 3);
    assert_eq!(progresses.first().map(|p| p.current), Some(0));
    assert_eq!(progresses.last().map(|p| p.current), Some(3));
}

#[rstest]
#[case::single_worker(1, 1)]
#[case::more_sources_than_workers(2, 5)]
#[case::workers_exceed_sources(6, 2)]
#[case::wide_pool(4, 9)]
#[case::nothing_to_check(3, 0)]
#[tokio::test]
async fn run_terminates_for_any_pool_shape(#[case] workers: usize, #[case] total: usize) {
    let sources = (0..total)
        .map(|i| searchable(&format!("src-{i}"), &format!("https://host{i}.example")))
        .collect();
    let (service, repository) = make_service(
        sources,
        ScriptedProber::healthy(),
        config(workers, Duration::from_secs(5)),
    );

    let mut events = service.subscribe();
    service.start().await.expect("start");
    let (progresses, terminal) = collect_run_events(&mut events).await;
    let summary = service.wait().await.expect("wait").expect("summary");

    assert_eq!(summary.status, CheckRunStatus::Completed);
    assert_eq!((summary.checked, summary.total), (total, total));
    assert_eq!(terminal.status, CheckRunStatus::Completed);
    assert_monotonic(&progresses, total);

    // Healthy unmarked sources are never written back.
    assert_eq!(repository.upsert_count().await, 0);
}

#[tokio::test]
async fn cancel_interrupts_hanging_probes() {
    let sources: Vec<ContentSource> = (0..4)
        .map(|i| searchable(&format!("src-{i}"), &format!("https://host{i}.example")))
        .collect();
    let prober = ScriptedProber::new(vec![
        ("https://host0.example", Script::Hang),
        ("https://host1.example", Script::Hang),
        ("https://host2.example", Script::Hang),
        ("https://host3.example", Script::Hang),
    ]);
    let (service, repository) = make_service(
        sources,
        prober,
        config(2, Duration::from_secs(30)),
    );

    let mut events = service.subscribe();
    service.start().await.expect("start");

    // The started report precedes the worker spawns, so once it is visible
    // the run is live.
    match events.recv().await.expect("started event") {
        CheckEvent::Progress(progress) => assert_eq!((progress.current, progress.total), (0, 4)),
        other => panic!("expected started progress, got {other:?}"),
    }

    service.cancel().await;
    assert_eq!(service.status().await, CheckRunStatus::Cancelled);

    // Cancelling again is a no-op once the terminal state is latched.
    service.cancel().await;

    let (_, terminal) = collect_run_events(&mut events).await;
    assert_eq!(terminal.status, CheckRunStatus::Cancelled);

    let summary = service.wait().await.expect("wait").expect("summary");
    assert_eq!(summary.status, CheckRunStatus::Cancelled);
    assert_eq!(summary.checked, 0);
    assert_eq!(summary.flagged, 0);

    // Abandoned probes never reconcile.
    assert_eq!(repository.upsert_count().await, 0);
    assert_eq!(service.status().await, CheckRunStatus::Idle);
}

#[tokio::test]
async fn start_is_ignored_while_a_run_is_active() {
    let sources = vec![searchable("src-0", "https://host0.example")];
    let prober = ScriptedProber::new(vec![("https://host0.example", Script::Hang)]);
    let (service, _repository) = make_service(
        sources,
        prober,
        config(1, Duration::from_secs(30)),
    );

    let first = service.start().await.expect("first start");
    let second = service.start().await.expect("second start");
    assert_eq!(first, second);

    service.cancel().await;
    let summary = service.wait().await.expect("wait").expect("summary");
    assert_eq!(summary.run_id, first);
    assert_eq!(summary.status, CheckRunStatus::Cancelled);
}

#[tokio::test]
async fn fresh_run_starts_after_the_previous_one_terminated() {
    let sources = vec![
        searchable("src-0", "https://host0.example"),
        searchable("src-1", "https://host1.example"),
    ];
    let (service, _repository) = make_service(
        sources,
        ScriptedProber::healthy(),
        config(2, Duration::from_secs(5)),
    );

    let mut events = service.subscribe();
    let first = service.start().await.expect("first start");
    let (_, terminal) = collect_run_events(&mut events).await;
    assert_eq!(terminal.run_id, first);

    // The terminal state is latched, so the slot can be reused without
    // waiting first.
    let second = service.start().await.expect("second start");
    assert_ne!(first, second);

    let summary = service.wait().await.expect("wait").expect("summary");
    assert_eq!(summary.run_id, second);
    assert_eq!(summary.status, CheckRunStatus::Completed);
}

#[tokio::test]
async fn sources_without_a_probe_target_are_skipped_but_counted() {
    let healthy = searchable("src-a", "https://alpha.example");
    // No search URL and no find rule on these two.
    let blank_one = ContentSource::new("src-b", "Blank One", "https://beta.example");
    let blank_two = ContentSource::new("src-c", "Blank Two", "https://gamma.example");

    let (service, repository) = make_service(
        vec![healthy, blank_one, blank_two],
        ScriptedProber::healthy(),
        config(1, Duration::from_secs(5)),
    );

    service.start().await.expect("start");
    let summary = service.wait().await.expect("wait").expect("summary");

    assert_eq!(summary.status, CheckRunStatus::Completed);
    assert_eq!((summary.checked, summary.total), (3, 3));
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.flagged, 0);

    // Skipped sources are left exactly as stored.
    assert_eq!(repository.upsert_count().await, 0);
    assert!(!repository.stored("src-b").await.has_tag(INVALID_SOURCE_TAG));
}

#[tokio::test]
async fn scripted_find_rule_is_resolved_through_the_evaluator() {
    let mut source = ContentSource::new("src-0", "Scripted", "https://alpha.example");
    source.find_rule = Some("<js>baseUrl + \"/all\"<ul>".into());
    source.add_tag(INVALID_SOURCE_TAG);

    let (service, repository) = make_service(
        vec![source],
        ScriptedProber::healthy(),
        config(1, Duration::from_secs(5)),
    );

    service.start().await.expect("start");
    let summary = service.wait().await.expect("wait").expect("summary");

    // The probe went through, so the marker is cleared and persisted.
    assert_eq!(summary.restored, 1);
    assert_eq!(summary.skipped, 0);
    assert!(!repository.stored("src-0").await.has_tag(INVALID_SOURCE_TAG));
}

#[tokio::test]
async fn script_evaluation_failure_flags_the_source() {
    let mut source = ContentSource::new("src-0", "Broken Script", "https://alpha.example");
    source.find_rule = Some("<js>explode()<ul>".into());

    let repository = Arc::new(MemoryRepository::new(vec![source]));
    let service = SourceCheckService::new(
        Arc::clone(&repository) as Arc<dyn SourceRepository>,
        Arc::new(ScriptedProber::healthy()),
        Arc::new(FailingEvaluator),
        Arc::new(SilentObserver),
        config(1, Duration::from_secs(5)),
    );

    service.start().await.expect("start");
    let summary = service.wait().await.expect("wait").expect("summary");

    assert_eq!(summary.flagged, 1);
    let flagged = repository.stored("src-0").await;
    assert!(flagged.has_tag(INVALID_SOURCE_TAG));
    assert_eq!(flagged.order_key, 10_000);
}
