//! Outbound posting to the code-hosting bot: `POST {BOT_URL}/trigger-review`,
//! or `POST {BOT_URL}/test/trigger-review` in dry-run/test mode, which writes the
//! payload to a file instead of calling out.
//!
//! Grounded on `mr-reviewer::publish`'s `PublishConfig`/`publish` pair — same
//! env-driven dry-run/concurrency knobs, same "log a created/edited/skipped
//! summary after the call" idiom — adapted from "post discussions directly
//! against a provider API" to "POST one envelope to a single bot endpoint",
//! since hosting-API authentication and per-provider wire
//! formats outside this system's scope.

use std::path::PathBuf;

use review_types::formatted::FormattedReview;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bot returned non-success status {status}: {body}")]
    BotStatus { status: u16, body: String },
    #[error("failed to write dry-run payload to {path}: {source}")]
    DryRunWrite { path: PathBuf, source: std::io::Error },
}

pub type HostingResult<T> = Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Comment,
    Approve,
    RequestChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerComment {
    pub path: String,
    pub line: u32,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_side: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerReviewRequest {
    pub owner: String,
    pub repo: String,
    pub pull_number: u64,
    pub installation_id: String,
    pub body: String,
    pub comments: Vec<TriggerComment>,
    pub event: ReviewEvent,
}

impl TriggerReviewRequest {
    /// Builds the envelope from a finished `FormattedReview` — `event` is
    /// always `Comment` here; the decision to approve/request-changes is a
    /// policy this crate doesn't make on its own (spec doesn't name one).
    pub fn from_formatted(owner: &str, repo: &str, pull_number: u64, installation_id: &str, review: &FormattedReview) -> Self {
        let comments = review
            .inline_comments
            .iter()
            .map(|c| TriggerComment {
                path: c.path.clone(),
                line: c.line,
                body: c.body.clone(),
                start_line: c.start_line,
                start_side: c.start_line.map(|_| "RIGHT".to_string()),
            })
            .collect();
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            pull_number,
            installation_id: installation_id.to_string(),
            body: review.summary_body.clone(),
            comments,
            event: ReviewEvent::Comment,
        }
    }
}

/// Mirrors `PublishConfig`'s env-driven defaults: dry-run on by default (a
/// misconfigured deployment should fail loud by posting nothing, not by
/// spamming a PR), concurrency unused here since one review is one POST.
#[derive(Debug, Clone)]
pub struct HostingConfig {
    pub bot_url: String,
    pub dry_run: bool,
    pub dry_run_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            bot_url: std::env::var("BOT_URL").unwrap_or_else(|_| "http://localhost:4000".to_string()),
            dry_run: env_bool("HOSTING_CLIENT_DRY_RUN", true),
            dry_run_dir: std::env::var("HOSTING_CLIENT_DRY_RUN_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("code_data/dry_run_reviews")),
            timeout_secs: env_u64("HOSTING_CLIENT_TIMEOUT_SECS", 30),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub struct HostingClient {
    http: reqwest::Client,
    cfg: HostingConfig,
}

impl HostingClient {
    pub fn new(cfg: HostingConfig) -> HostingResult<Self> {
        let http = reqwest::Client::builder().timeout(std::time::Duration::from_secs(cfg.timeout_secs)).build()?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> HostingResult<Self> {
        Self::new(HostingConfig::default())
    }

    /// Posts the review. In dry-run mode, writes the payload under
    /// `dry_run_dir` instead of calling the bot, matching the
    /// `/test/trigger-review` contract.
    pub async fn trigger_review(&self, req: &TriggerReviewRequest) -> HostingResult<()> {
        if self.cfg.dry_run {
            return self.write_dry_run(req).await;
        }

        let url = format!("{}/trigger-review", self.cfg.bot_url);
        let resp = self.http.post(&url).json(req).send().await?;
        if resp.status().is_success() {
            info!(owner = %req.owner, repo = %req.repo, pull_number = req.pull_number, comments = req.comments.len(), "posted review to hosting bot");
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, %body, "hosting bot rejected trigger-review");
            Err(Error::BotStatus { status, body })
        }
    }

    async fn write_dry_run(&self, req: &TriggerReviewRequest) -> HostingResult<()> {
        tokio::fs::create_dir_all(&self.cfg.dry_run_dir)
            .await
            .map_err(|source| Error::DryRunWrite { path: self.cfg.dry_run_dir.clone(), source })?;
        let path = self.cfg.dry_run_dir.join(format!("{}-{}-{}.json", req.owner, req.repo, req.pull_number));
        let payload = serde_json::to_vec_pretty(req).unwrap_or_default();
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| Error::DryRunWrite { path: path.clone(), source })?;
        info!(path = %path.display(), "wrote dry-run trigger-review payload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_types::formatted::FormattedInlineComment;
    use review_types::issue::Severity;

    fn sample_review() -> FormattedReview {
        FormattedReview {
            summary_body: "Looks good overall.".to_string(),
            inline_comments: vec![FormattedInlineComment {
                path: "src/lib.rs".to_string(),
                line: 10,
                start_line: None,
                body: "Consider handling this error.".to_string(),
                severity: Severity::Medium,
            }],
            dropped: Vec::new(),
        }
    }

    #[test]
    fn from_formatted_builds_one_comment_per_inline_comment() {
        let review = sample_review();
        let req = TriggerReviewRequest::from_formatted("acme", "widgets", 42, "inst-1", &review);
        assert_eq!(req.comments.len(), 1);
        assert_eq!(req.comments[0].path, "src/lib.rs");
        assert_eq!(req.comments[0].line, 10);
        assert_eq!(req.event, ReviewEvent::Comment);
        assert_eq!(req.body, "Looks good overall.");
    }

    #[test]
    fn multiline_comment_sets_start_side_right() {
        let mut review = sample_review();
        review.inline_comments[0].start_line = Some(5);
        let req = TriggerReviewRequest::from_formatted("acme", "widgets", 42, "inst-1", &review);
        assert_eq!(req.comments[0].start_line, Some(5));
        assert_eq!(req.comments[0].start_side.as_deref(), Some("RIGHT"));
    }

    #[tokio::test]
    async fn dry_run_writes_payload_to_disk_instead_of_posting() {
        let dir = std::env::temp_dir().join(format!("hosting-client-test-{}", std::process::id()));
        let cfg = HostingConfig {
            bot_url: "http://unused.invalid".to_string(),
            dry_run: true,
            dry_run_dir: dir.clone(),
            timeout_secs: 5,
        };
        let client = HostingClient::new(cfg).unwrap();
        let req = TriggerReviewRequest::from_formatted("acme", "widgets", 7, "inst-1", &sample_review());
        client.trigger_review(&req).await.unwrap();
        let path = dir.join("acme-widgets-7.json");
        assert!(tokio::fs::metadata(&path).await.is_ok());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
