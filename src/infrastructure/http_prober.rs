//! HTTP probe implementation
//!
//! Issues one GET per probe through a pooled reqwest client. The target
//! template gets the configured keyword substituted in and is resolved
//! against the source's base URL when relative. Hits come from a
//! configurable CSS selector; without one, any non-empty body counts as a
//! single hit.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::domain::services::{ProbeError, ProbeHit, ProbeOutcome, SourceProber};
use crate::domain::source::SEARCH_KEYWORD_PLACEHOLDER;
use crate::infrastructure::config::{AppConfig, defaults};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpProberConfig {
    pub user_agent: String,
    pub search_keyword: String,
    /// CSS selector for result entries. `None` falls back to the
    /// non-empty-body heuristic.
    pub result_selector: Option<String>,
}

impl Default for HttpProberConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            search_keyword: defaults::SEARCH_KEYWORD.to_string(),
            result_selector: None,
        }
    }
}

impl HttpProberConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            user_agent: config.advanced.user_agent.clone(),
            search_keyword: config.user.checker.search_keyword.clone(),
            result_selector: config.advanced.result_selector.clone(),
        }
    }
}

pub struct HttpSourceProber {
    client: reqwest::Client,
    config: HttpProberConfig,
}

impl HttpSourceProber {
    pub fn new(config: HttpProberConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self { client, config })
    }

    /// Substitutes the keyword and absolutizes the target against the
    /// source origin.
    fn effective_url(&self, target: &str, base_url: &str) -> Result<Url, ProbeError> {
        let substituted = target.replace(SEARCH_KEYWORD_PLACEHOLDER, &self.config.search_keyword);
        if let Ok(url) = Url::parse(&substituted) {
            return Ok(url);
        }
        Url::parse(base_url)
            .and_then(|base| base.join(&substituted))
            .map_err(|err| ProbeError::Transport(format!("invalid probe url '{substituted}': {err}")))
    }

    fn extract_hits(&self, body: &str, page_url: &Url) -> Vec<ProbeHit> {
        match self.config.result_selector.as_deref() {
            Some(selector_text) => match Selector::parse(selector_text) {
                Ok(selector) => {
                    let document = Html::parse_document(body);
                    document
                        .select(&selector)
                        .map(|element| {
                            let title = element.text().collect::<String>().trim().to_string();
                            let href = element
                                .value()
                                .attr("href")
                                .and_then(|href| page_url.join(href).ok())
                                .map_or_else(|| page_url.to_string(), |url| url.to_string());
                            ProbeHit {
                                title: if title.is_empty() { href.clone() } else { title },
                                url: href,
                            }
                        })
                        .collect()
                }
                Err(err) => {
                    warn!("invalid result selector '{selector_text}': {err}; using body heuristic");
                    fallback_hits(body, page_url)
                }
            },
            None => fallback_hits(body, page_url),
        }
    }
}

fn fallback_hits(body: &str, page_url: &Url) -> Vec<ProbeHit> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    vec![ProbeHit {
        title: page_url
            .host_str()
            .map_or_else(|| page_url.to_string(), ToString::to_string),
        url: page_url.to_string(),
    }]
}

fn map_reqwest_error(err: &reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(err.to_string())
    }
}

#[async_trait]
impl SourceProber for HttpSourceProber {
    async fn probe(
        &self,
        url: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        let url = self.effective_url(url, base_url)?;
        debug!("probing {url}");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err))?;

        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            return Err(ProbeError::Transport(format!(
                "{final_url} answered with status {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| map_reqwest_error(&err))?;
        Ok(ProbeOutcome {
            hits: self.extract_hits(&body, &final_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prober(selector: Option<&str>) -> HttpSourceProber {
        HttpSourceProber::new(HttpProberConfig {
            result_selector: selector.map(ToString::to_string),
            ..HttpProberConfig::default()
        })
        .expect("client")
    }

    #[test]
    fn keyword_is_substituted_into_the_template() {
        let prober = prober(None);
        let url = prober
            .effective_url(
                "https://example.com/search?q={keyword}&page=1",
                "https://example.com",
            )
            .expect("url");
        assert_eq!(url.as_str(), "https://example.com/search?q=novel&page=1");
    }

    #[test]
    fn relative_targets_join_the_base_url() {
        let prober = prober(None);
        let url = prober
            .effective_url("/rank/top", "https://example.com/app/")
            .expect("url");
        assert_eq!(url.as_str(), "https://example.com/rank/top");
    }

    #[test]
    fn unparseable_target_is_a_transport_error() {
        let prober = prober(None);
        let result = prober.effective_url("/rank", "not a base url");
        assert!(matches!(result, Err(ProbeError::Transport(_))));
    }

    #[test]
    fn selector_extracts_one_hit_per_match() {
        let prober = prober(Some("a.result"));
        let page_url = Url::parse("https://example.com/search").expect("url");
        let body = r#"
            <html><body>
                <a class="result" href="/item/1">First</a>
                <a class="result" href="https://other.example.com/2">Second</a>
                <a class="other" href="/item/3">Ignored</a>
            </body></html>
        "#;
        let hits = prober.extract_hits(body, &page_url);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First");
        assert_eq!(hits[0].url, "https://example.com/item/1");
        assert_eq!(hits[1].url, "https://other.example.com/2");
    }

    #[test]
    fn selector_with_no_matches_means_empty_outcome() {
        let prober = prober(Some("a.result"));
        let page_url = Url::parse("https://example.com").expect("url");
        assert!(prober.extract_hits("<html><body>nothing</body></html>", &page_url).is_empty());
    }

    #[test]
    fn body_heuristic_counts_non_empty_pages() {
        let prober = prober(None);
        let page_url = Url::parse("https://example.com").expect("url");
        assert_eq!(prober.extract_hits("<html></html>", &page_url).len(), 1);
        assert!(prober.extract_hits("   \n  ", &page_url).is_empty());
    }

    #[test]
    fn invalid_selector_falls_back_to_body_heuristic() {
        let prober = prober(Some("a[unclosed"));
        let page_url = Url::parse("https://example.com").expect("url");
        assert_eq!(prober.extract_hits("content", &page_url).len(), 1);
    }
}
