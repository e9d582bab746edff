//! CLI entry point
//!
//! Runs one full check pass over the stored sources and exits. Ctrl-C
//! cancels the run cooperatively; the summary is logged either way.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use sourcecheck::application::{CheckEngineConfig, SourceCheckService};
use sourcecheck::infrastructure::{
    ConfigManager, DatabaseConnection, DisabledScriptEvaluator, HttpProberConfig,
    HttpSourceProber, LogProgressReporter, SqliteSourceRepository, init_logging_with_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::new()?;
    let config = manager.initialize_on_first_run().await?;

    let mut logging = config.user.logging.clone();
    if config.user.verbose_logging {
        logging.level = "debug".to_string();
    }
    init_logging_with_config(logging)?;

    info!("🚀 sourcecheck starting (config: {})", manager.config_path().display());

    let data_dir = ConfigManager::get_app_data_dir()?;
    let database_url = config.advanced.database_url.clone().unwrap_or_else(|| {
        format!("sqlite:{}?mode=rwc", data_dir.join("sources.db").display())
    });
    let connection =
        DatabaseConnection::new(&database_url, config.advanced.max_db_connections).await?;
    connection.migrate().await?;

    let repository = Arc::new(SqliteSourceRepository::new(connection.pool().clone()));
    let stored = repository.count().await?;
    info!("{stored} sources stored");
    if stored == 0 {
        warn!("source store is empty; the run will terminate immediately");
    }

    let prober = Arc::new(
        HttpSourceProber::new(HttpProberConfig::from_app_config(&config))
            .context("building source prober")?,
    );
    let engine_config = CheckEngineConfig {
        worker_count: config.user.effective_worker_count(),
        probe_timeout: config.user.checker.probe_timeout(),
        invalid_tag: config.user.checker.invalid_tag.clone(),
    };
    let service = Arc::new(SourceCheckService::new(
        repository,
        prober,
        Arc::new(DisabledScriptEvaluator),
        Arc::new(LogProgressReporter::new()),
        engine_config,
    ));

    service.start().await?;

    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    service.cancel().await;
                }
                Err(err) => warn!("could not listen for interrupt: {err}"),
            }
        });
    }

    if let Some(summary) = service.wait().await? {
        info!(
            "run {} {}: {}/{} checked, {} flagged, {} restored, {} skipped in {:.1}s",
            summary.run_id,
            summary.status,
            summary.checked,
            summary.total,
            summary.flagged,
            summary.restored,
            summary.skipped,
            summary.elapsed().num_milliseconds() as f64 / 1000.0
        );
    }

    Ok(())
}
