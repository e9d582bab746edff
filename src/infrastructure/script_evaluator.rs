//! Script evaluation seam
//!
//! Scripted find rules need an expression engine to resolve. No engine is
//! embedded in this build, so scripted sources fail evaluation and flow
//! through the invalid path. The `ScriptEvaluator` trait is the extension
//! point for wiring a real engine in.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::services::ScriptEvaluator;

/// Evaluator that rejects every expression.
pub struct DisabledScriptEvaluator;

#[async_trait]
impl ScriptEvaluator for DisabledScriptEvaluator {
    async fn evaluate(&self, expression: &str, base_url: &str) -> Result<String> {
        debug!(
            "script evaluation requested for {base_url} ({} chars) but no engine is configured",
            expression.len()
        );
        anyhow::bail!("no script engine is configured")
    }
}
