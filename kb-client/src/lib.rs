//! Knowledge-base collaborator client (outbound HTTP).
//!
//! Adapted from `backend/agent/services/kb_client.py`'s `KnowledgeBaseClient`:
//! same endpoint surface (`/learnings`, `/learnings/search`,
//! `/learnings/pr-context`), same "disabled means every call is a silent
//! no-op" behavior gated by `KB_ENABLED`, same reqwest-client-with-timeout
//! idiom used by `ai-llm-service::health_service`. Every public method
//! returns `Ok(default)` rather than propagating a transport error — the
//! knowledge base is an optional collaborator (`ExternalServiceError`
//! is recoverable, the caller falls back to no KB context).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type KbResult<T> = Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Learning {
    pub learning: String,
    #[serde(default)]
    pub learnt_from: Option<String>,
    #[serde(default)]
    pub pr: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    /// `true` when this learning records a past rejection of a similar
    /// finding — drives `review-aggregator`'s KB-filter drop path.
    #[serde(default)]
    pub rejected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbContext {
    pub learnings: Vec<Learning>,
}

impl KbContext {
    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty()
    }
}

#[derive(Serialize)]
struct StoreLearningRequest<'a> {
    learning: &'a str,
    learnt_from: &'a str,
    pr: &'a str,
    file: Option<&'a str>,
    timestamp: String,
}

#[derive(Serialize)]
struct PrContextRequest<'a> {
    owner: &'a str,
    repo: &'a str,
    pr_description: &'a str,
    changed_files: &'a [String],
    k: u32,
}

#[derive(Deserialize)]
struct LearningsEnvelope {
    #[serde(default)]
    learnings: Vec<Learning>,
}

pub struct KbClient {
    client: reqwest::Client,
    base_url: String,
    enabled: bool,
}

impl KbClient {
    pub fn new(base_url: impl Into<String>, enabled: bool, timeout_secs: u64) -> KbResult<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self { client, base_url: base_url.into(), enabled })
    }

    /// Reads `KNOWLEDGE_BASE_URL` (default `http://localhost:8000`) and
    /// `KB_ENABLED` (default `false`) exactly as the original client does.
    pub fn from_env() -> KbResult<Self> {
        let base_url = std::env::var("KNOWLEDGE_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let enabled = std::env::var("KB_ENABLED").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        Self::new(base_url, enabled, 30)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn health_check(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "KB health check failed");
                false
            }
        }
    }

    pub async fn store_learning(&self, learning: &str, learnt_from: &str, pr: &str, file: Option<&str>) -> KbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let body = StoreLearningRequest {
            learning,
            learnt_from,
            pr,
            file,
            timestamp: now_iso8601(),
        };
        match self.client.post(format!("{}/learnings", self.base_url)).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(pr, "stored learning in KB");
                Ok(())
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "KB store_learning returned non-success status");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "KB store_learning failed");
                Ok(())
            }
        }
    }

    pub async fn search_learnings(&self, query: &str, owner: &str, repo: &str, k: u32, min_confidence: f64) -> Vec<Learning> {
        if !self.enabled {
            return Vec::new();
        }
        let url = format!("{}/learnings/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("q", query.to_string()),
                ("owner", owner.to_string()),
                ("repo", repo.to_string()),
                ("k", k.to_string()),
                ("min_confidence", min_confidence.to_string()),
            ])
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => r
                .json::<LearningsEnvelope>()
                .await
                .map(|e| e.learnings)
                .unwrap_or_default(),
            Ok(r) => {
                warn!(status = %r.status(), "KB search_learnings returned non-success status");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "KB search_learnings failed");
                Vec::new()
            }
        }
    }

    /// Fetches learnings relevant to an entire PR in one call — used by the
    /// review worker to build its prompt's KB-context section.
    pub async fn get_pr_context(&self, owner: &str, repo: &str, pr_description: &str, changed_files: &[String], k: u32) -> KbContext {
        if !self.enabled {
            return KbContext::default();
        }
        let body = PrContextRequest { owner, repo, pr_description, changed_files, k };
        match self.client.post(format!("{}/learnings/pr-context", self.base_url)).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<LearningsEnvelope>()
                .await
                .map(|e| KbContext { learnings: e.learnings })
                .unwrap_or_default(),
            Ok(resp) => {
                warn!(status = %resp.status(), "KB get_pr_context returned non-success status");
                KbContext::default()
            }
            Err(e) => {
                warn!(error = %e, "KB get_pr_context failed");
                KbContext::default()
            }
        }
    }

    /// Builds the prompt fragment the review worker splices into its
    /// system message. Mirrors `format_learnings_for_prompt`'s output shape.
    pub fn format_for_prompt(ctx: &KbContext, max_learnings: usize) -> String {
        if ctx.learnings.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n## Relevant Learnings from Past Reviews\n\n");
        for (i, l) in ctx.learnings.iter().take(max_learnings).enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, l.learning));
        }
        out
    }
}

/// Matches `datetime.utcnow().isoformat()`'s microsecond precision.
fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_never_calls_network_and_returns_defaults() {
        let client = KbClient::new("http://127.0.0.1:1", false, 1).unwrap();
        assert!(!client.health_check().await);
        assert!(client.search_learnings("q", "o", "r", 5, 0.3).await.is_empty());
        assert!(client.get_pr_context("o", "r", "desc", &[], 5).await.is_empty());
        assert!(client.store_learning("l", "user", "o/r#1", None).await.is_ok());
    }

    #[test]
    fn format_for_prompt_is_empty_for_empty_context() {
        assert_eq!(KbClient::format_for_prompt(&KbContext::default(), 5), "");
    }
}
