//! Offline sanity run for the check engine
//!
//! Wires an in-memory repository and a canned prober through the full
//! service so the claim/report/reconcile pipeline can be watched without
//! touching the network or a database file. Useful after refactors:
//! `cargo run --bin check_sanity`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::info;

use sourcecheck::application::{CheckEngineConfig, SourceCheckService};
use sourcecheck::domain::repositories::SourceRepository;
use sourcecheck::domain::services::{ProbeError, ProbeHit, ProbeOutcome, ScriptEvaluator, SourceProber};
use sourcecheck::domain::source::{ContentSource, INVALID_SOURCE_TAG};
use sourcecheck::domain::CheckEvent;
use sourcecheck::infrastructure::{LogProgressReporter, init_logging};

struct MemoryRepository {
    records: Mutex<HashMap<String, ContentSource>>,
}

impl MemoryRepository {
    fn new(sources: Vec<ContentSource>) -> Self {
        let records = sources.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            records: Mutex::new(records),
        }
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
        Ok(())
    }
}

/// Probes by URL marker: "dead" answers empty, "broken" fails transport,
/// everything else returns one hit.
struct CannedProber;

#[async_trait]
impl SourceProber for CannedProber {
    async fn probe(
        &self,
        url: &str,
        _base_url: &str,
        _timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        if url.contains("dead") {
            return Ok(ProbeOutcome::default());
        }
        if url.contains("broken") {
            return Err(ProbeError::Transport("connection refused".into()));
        }
        Ok(ProbeOutcome {
            hits: vec![ProbeHit {
                title: "entry".into(),
                url: url.to_string(),
            }],
        })
    }
}

struct EchoEvaluator;

#[async_trait]
impl ScriptEvaluator for EchoEvaluator {
    async fn evaluate(&self, expression: &str, base_url: &str) -> Result<String> {
        Ok(expression.replace("baseUrl", base_url))
    }
}

fn seed_sources() -> Vec<ContentSource> {
    let mut healthy = ContentSource::new("s1", "Healthy", "https://alpha.example");
    healthy.search_url = Some("https://alpha.example/s?q={keyword}".into());

    let mut marked = ContentSource::new("s2", "Recovered", "https://beta.example");
    marked.search_url = Some("https://beta.example/s".into());
    marked.add_tag(INVALID_SOURCE_TAG);

    let mut dead = ContentSource::new("s3", "Dead", "https://dead.example");
    dead.search_url = Some("https://dead.example/s".into());

    let mut broken = ContentSource::new("s4", "Broken", "https://broken.example");
    broken.search_url = Some("https://broken.example/s".into());

    let mut scripted = ContentSource::new("s5", "Scripted", "https://gamma.example");
    scripted.find_rule = Some("<js>baseUrl<map>".into());

    let blank = ContentSource::new("s6", "NoTarget", "https://delta.example");

    vec![healthy, marked, dead, broken, scripted, blank]
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    info!("sanity run starting");

    let repository = Arc::new(MemoryRepository::new(seed_sources()));
    let service = Arc::new(SourceCheckService::new(
        Arc::clone(&repository) as Arc<dyn SourceRepository>,
        Arc::new(CannedProber),
        Arc::new(EchoEvaluator),
        Arc::new(LogProgressReporter::new()),
        CheckEngineConfig {
            worker_count: 3,
            probe_timeout: Duration::from_secs(5),
            ..CheckEngineConfig::default()
        },
    ));

    let mut events = service.event_stream();
    let watcher = tokio::spawn(async move {
        while let Some(Ok(event)) = events.next().await {
            match event {
                CheckEvent::Progress(progress) => {
                    info!("event: {}/{} ({:.0}%)", progress.current, progress.total, progress.percentage);
                }
                CheckEvent::Terminated(summary) => {
                    info!("event: terminal {} after {} checks", summary.status, summary.checked);
                    break;
                }
            }
        }
    });

    service.start().await?;
    let summary = service
        .wait()
        .await?
        .expect("sanity run should produce a summary");
    watcher.await?;

    info!(
        "summary: {} {}/{} checked, {} flagged, {} restored, {} skipped",
        summary.status, summary.checked, summary.total,
        summary.flagged, summary.restored, summary.skipped
    );

    for source in repository.list_all().await? {
        info!(
            "  {} [{}] order={} tags={:?}",
            source.id, source.name, source.order_key, source.tags
        );
    }

    Ok(())
}
