//! Content source entity and probe target derivation
//!
//! A `ContentSource` describes how to reach one remote content site: its
//! origin, an optional search endpoint template and an optional discovery
//! ("find") rule. The checker derives a probe target from these fields and
//! reconciles the probe outcome back into the record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::services::{ProbeError, ScriptEvaluator};

/// Tag attached to a source whose last probe failed or came back empty.
pub const INVALID_SOURCE_TAG: &str = "invalid";

/// Flagged sources are pushed to the end of the stored ordering; their new
/// order key is this base plus the claim index of the failing probe.
pub const INVALIDATED_ORDER_BASE: i64 = 10_000;

/// Placeholder replaced with the configured search keyword when a search
/// endpoint template is probed.
pub const SEARCH_KEYWORD_PLACEHOLDER: &str = "{keyword}";

/// Prefix marking a find rule as an executable script expression.
const SCRIPT_RULE_PREFIX: &str = "<js>";

/// Find rules may chain several steps; only the first segment is a URL.
static RULE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(&&|\n)+").expect("valid rule separator pattern"));

/// Stored configuration of one remote content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSource {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub search_url: Option<String>,
    pub find_rule: Option<String>,
    pub tags: BTreeSet<String>,
    pub order_key: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentSource {
    /// Creates a source with empty tags and default ordering.
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            search_url: None,
            find_rule: None,
            tags: BTreeSet::new(),
            order_key: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derives the probe target for this source. The search endpoint takes
    /// precedence; a source with neither search endpoint nor find rule has
    /// no target and is skipped by the checker.
    #[must_use]
    pub fn probe_target(&self) -> Option<ProbeTarget> {
        if let Some(url) = non_empty(self.search_url.as_deref()) {
            return Some(ProbeTarget::Search(url.to_string()));
        }
        non_empty(self.find_rule.as_deref()).map(|rule| ProbeTarget::Find(FindRule::parse(rule)))
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Inserts `tag`; returns false when it was already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Removes `tag`; returns false when it was not present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    /// Flags the source as invalid and demotes it in the stored ordering.
    pub fn mark_invalid(&mut self, tag: &str, order_key: i64) {
        self.add_tag(tag.to_string());
        self.order_key = order_key;
        self.touch();
    }

    /// Clears the invalid flag if present. Returns true when the record
    /// actually changed.
    pub fn clear_invalid(&mut self, tag: &str) -> bool {
        let removed = self.remove_tag(tag);
        if removed {
            self.touch();
        }
        removed
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// What the checker will probe for a given source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Search endpoint template, probed with the configured keyword.
    Search(String),
    /// Discovery rule, possibly scripted, resolved to a URL before probing.
    Find(FindRule),
}

impl ProbeTarget {
    /// Resolves the target to an effective probe URL.
    ///
    /// Returns `Ok(None)` when the rule yields no usable URL segment; the
    /// checker skips such sources without flagging them. Script evaluation
    /// failures are probe failures and flow into the invalid path.
    pub async fn resolve(
        &self,
        evaluator: &dyn ScriptEvaluator,
        base_url: &str,
    ) -> Result<Option<String>, ProbeError> {
        match self {
            Self::Search(url) => Ok(Some(url.clone())),
            Self::Find(FindRule::Plain(rule)) => Ok(first_rule_segment(rule)),
            Self::Find(FindRule::Scripted(expression)) => {
                let rendered = evaluator
                    .evaluate(expression, base_url)
                    .await
                    .map_err(|err| ProbeError::ScriptEvaluation(format!("{err:#}")))?;
                Ok(first_rule_segment(&rendered))
            }
        }
    }
}

/// A find rule as stored on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindRule {
    /// Literal rule text; the first segment is the URL to probe.
    Plain(String),
    /// Script expression, the text between the `<js>` prefix and the last
    /// `<` of the rule. Evaluated with the source's base URL in scope.
    Scripted(String),
}

impl FindRule {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix(SCRIPT_RULE_PREFIX) {
            // Rules usually close with a trailing rule section ("...<map>");
            // without one the whole remainder is the expression.
            let expression = match rest.rfind('<') {
                Some(position) => &rest[..position],
                None => rest,
            };
            Self::Scripted(expression.trim().to_string())
        } else {
            Self::Plain(trimmed.to_string())
        }
    }
}

/// First non-empty segment of a rule once separators are applied. `None`
/// means the rule is malformed for probing purposes.
fn first_rule_segment(rule: &str) -> Option<String> {
    RULE_SEPARATOR
        .split(rule)
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .map(ToString::to_string)
}
