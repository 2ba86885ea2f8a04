//! Sandbox Manager (C3): session-scoped remote execution environments.
//!
//! Grounded on `backend/agent/services/sandbox_manager.py`'s
//! `SandboxManager`: same reuse-on-`create` rule, same exponential-backoff
//! retry schedule (`delay = retry_delay * 2^(attempt-1)`), same
//! always-remove-on-kill guarantee.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use review_types::{SandboxSession, SandboxStatus};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::SandboxConfig;
use crate::diff::{self, ValidLines};
use crate::error::{Error, SandboxResult};
use crate::provider::{CommandOutput, ProcessProvider};

pub struct SandboxManager {
    sessions: Mutex<HashMap<String, SandboxSession>>,
    provider: ProcessProvider,
    config: SandboxConfig,
}

pub struct DiffResult {
    pub valid_lines: ValidLines,
    pub diff_text_per_file: HashMap<String, String>,
}

impl SandboxManager {
    pub fn new(root: PathBuf, config: SandboxConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            provider: ProcessProvider::new(root),
            config,
        }
    }

    #[instrument(skip(self, metadata), fields(session_id = %session_id))]
    pub async fn create_sandbox(
        &self,
        session_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> SandboxResult<SandboxSession> {
        let _ = metadata;
        {
            let sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(session_id) {
                if existing.status.is_usable() {
                    debug!("reusing existing sandbox session");
                    return Ok(existing.clone());
                }
            }
        }

        let mut last_err = String::new();
        for attempt in 1..=self.config.max_retries.max(1) {
            match self.provider.provision(session_id).await {
                Ok(_) => {
                    let now = Utc::now();
                    let mut session = SandboxSession::new(session_id, now);
                    session.status = SandboxStatus::Running;
                    let mut sessions = self.sessions.lock().await;
                    sessions.insert(session_id.to_string(), session.clone());
                    return Ok(session);
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!(attempt, error = %last_err, "sandbox creation attempt failed");
                    if attempt < self.config.max_retries {
                        let delay = self.config.retry_delay_seconds * 2f64.powi((attempt - 1) as i32);
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }
        Err(Error::Creation(last_err))
    }

    pub async fn get_sandbox(&self, session_id: &str) -> SandboxResult<SandboxSession> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        if session.status.is_terminal() {
            return Err(Error::Terminal(session_id.to_string()));
        }
        Ok(session.clone())
    }

    pub async fn extend_timeout(&self, session_id: &str, _additional_ms: u64) -> SandboxResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        session.touch(Utc::now());
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn clone_repo(
        &self,
        session_id: &str,
        repo_url: &str,
        branch: &str,
        depth: u32,
    ) -> SandboxResult<String> {
        self.set_status(session_id, SandboxStatus::Cloning).await?;
        let workdir = self.provider.session_dir(session_id);

        let output = self
            .provider
            .run(
                &workdir,
                "git",
                &[
                    "clone",
                    "--depth",
                    &depth.to_string(),
                    "--branch",
                    branch,
                    repo_url,
                    "repo",
                ],
                Duration::from_secs(120),
            )
            .await?;

        if output.exit_code != 0 {
            self.fail(session_id, &output.stderr).await;
            return Err(Error::Operation(output.stderr));
        }

        let repo_path = workdir.join("repo").to_string_lossy().into_owned();
        self.set_repo_path(session_id, &repo_path).await?;
        self.set_status(session_id, SandboxStatus::Ready).await?;
        Ok(repo_path)
    }

    /// Fork-PR clone: clone the fork's head, then add and fetch the base as
    /// a second remote so `git diff base...head` resolves.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn clone_fork_repo(
        &self,
        session_id: &str,
        fork_owner: &str,
        fork_repo: &str,
        branch: &str,
        base_owner: &str,
        base_repo: &str,
        base_branch: &str,
    ) -> SandboxResult<String> {
        let fork_url = format!("https://github.com/{fork_owner}/{fork_repo}.git");
        let repo_path = self.clone_repo(session_id, &fork_url, branch, 50).await?;
        let workdir = PathBuf::from(&repo_path);
        let base_url = format!("https://github.com/{base_owner}/{base_repo}.git");

        let add_remote = self
            .provider
            .run(&workdir, "git", &["remote", "add", "base", &base_url], Duration::from_secs(30))
            .await?;
        if add_remote.exit_code != 0 {
            self.fail(session_id, &add_remote.stderr).await;
            return Err(Error::Operation(add_remote.stderr));
        }

        let fetch_base = self
            .provider
            .run(
                &workdir,
                "git",
                &["fetch", "base", base_branch, "--depth", "50"],
                Duration::from_secs(60),
            )
            .await?;
        if fetch_base.exit_code != 0 {
            self.fail(session_id, &fetch_base.stderr).await;
            return Err(Error::Operation(fetch_base.stderr));
        }

        Ok(repo_path)
    }

    /// `git diff base...head` inside the sandbox, parsed into `ValidLines`
    /// and per-file diff text.
    pub async fn get_diff(&self, session_id: &str, base_ref: &str, head_ref: &str, three_dot: bool) -> SandboxResult<DiffResult> {
        let repo_path = self
            .get_sandbox(session_id)
            .await?
            .repo_path
            .ok_or_else(|| Error::Operation("sandbox has no cloned repo".to_string()))?;
        let range = if three_dot {
            format!("{base_ref}...{head_ref}")
        } else {
            format!("{base_ref}..{head_ref}")
        };
        let output = self
            .provider
            .run(std::path::Path::new(&repo_path), "git", &["diff", &range], Duration::from_secs(60))
            .await?;
        if output.exit_code != 0 {
            return Err(Error::Operation(output.stderr));
        }
        let (valid_lines, diff_text_per_file) = diff::parse_unified_diff(&output.stdout);
        Ok(DiffResult { valid_lines, diff_text_per_file })
    }

    pub async fn read_file(&self, session_id: &str, path: &str) -> SandboxResult<String> {
        let repo_path = self.repo_path(session_id).await?;
        self.provider.read_file(&repo_path, path).await
    }

    pub async fn read_file_binary(&self, session_id: &str, path: &str) -> SandboxResult<Vec<u8>> {
        let repo_path = self.repo_path(session_id).await?;
        self.provider.read_file_binary(&repo_path, path).await
    }

    pub async fn write_file(&self, session_id: &str, path: &str, content: &[u8]) -> SandboxResult<()> {
        let repo_path = self.repo_path(session_id).await?;
        self.provider.write_file(&repo_path, path, content).await
    }

    pub async fn list_files(&self, session_id: &str, pattern: Option<&str>) -> SandboxResult<Vec<String>> {
        let repo_path = self.repo_path(session_id).await?;
        self.provider.list_files(&repo_path, pattern).await
    }

    pub async fn run_command(&self, session_id: &str, cmd: &str, args: &[&str], timeout_secs: u64) -> SandboxResult<CommandOutput> {
        if timeout_secs > 30 {
            let _ = self.extend_timeout(session_id, timeout_secs * 1000).await;
        }
        let repo_path = self.repo_path(session_id).await?;
        self.provider.run(&repo_path, cmd, args, Duration::from_secs(timeout_secs)).await
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn kill_sandbox(&self, session_id: &str) -> bool {
        let _ = self.provider.teardown(session_id).await;
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id).is_some()
    }

    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        let mut count = 0;
        for id in ids {
            if self.kill_sandbox(&id).await {
                count += 1;
            }
        }
        count
    }

    pub async fn get_active_sessions(&self) -> Vec<SandboxSession> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn get_session_status(&self, session_id: &str) -> Option<SandboxStatus> {
        self.sessions.lock().await.get(session_id).map(|s| s.status)
    }

    async fn repo_path(&self, session_id: &str) -> SandboxResult<PathBuf> {
        let session = self.get_sandbox(session_id).await?;
        session
            .repo_path
            .map(PathBuf::from)
            .ok_or_else(|| Error::Operation("sandbox has no cloned repo".to_string()))
    }

    async fn set_status(&self, session_id: &str, status: SandboxStatus) -> SandboxResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        session.status = status;
        session.touch(Utc::now());
        Ok(())
    }

    async fn set_repo_path(&self, session_id: &str, repo_path: &str) -> SandboxResult<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        session.repo_path = Some(repo_path.to_string());
        Ok(())
    }

    async fn fail(&self, session_id: &str, message: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.status = SandboxStatus::Error;
            session.error_message = Some(message.to_string());
        }
    }
}

/// Scoped acquisition: the supervisor holds one of these for the lifetime
/// of a review and calls `release` on every exit path (success, error,
/// cancellation), guaranteeing the `create_sandbox`/`kill_sandbox` pairing
/// every control-flow exit requires. Takes an owned `Arc` rather than a borrow so the
/// caller can `release` it from inside a `finally`-style block without
/// fighting the borrow checker.
pub struct ScopedSandbox {
    manager: std::sync::Arc<SandboxManager>,
    pub session_id: String,
    released: bool,
}

impl ScopedSandbox {
    pub async fn acquire(
        manager: std::sync::Arc<SandboxManager>,
        session_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> SandboxResult<Self> {
        manager.create_sandbox(session_id, metadata).await?;
        Ok(Self {
            manager,
            session_id: session_id.to_string(),
            released: false,
        })
    }

    /// Idempotent: safe to call once explicitly and let `Drop`'s debug
    /// assertion confirm it already happened.
    pub async fn release(mut self) -> bool {
        self.released = true;
        self.manager.kill_sandbox(&self.session_id).await
    }
}

impl Drop for ScopedSandbox {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                session_id = %self.session_id,
                "ScopedSandbox dropped without release(); sandbox cleanup must be awaited explicitly"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SandboxConfig {
        SandboxConfig {
            api_key: None,
            template_id: None,
            default_timeout_ms: 300_000,
            max_retries: 3,
            retry_delay_seconds: 0.001,
        }
    }

    #[tokio::test]
    async fn create_sandbox_reuses_running_session() {
        let dir = tempdir();
        let manager = SandboxManager::new(dir.clone(), config());
        let s1 = manager.create_sandbox("s1", None).await.unwrap();
        let s2 = manager.create_sandbox("s1", None).await.unwrap();
        assert_eq!(s1.created_at, s2.created_at);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn kill_sandbox_always_removes_from_map_even_if_missing() {
        let dir = tempdir();
        let manager = SandboxManager::new(dir.clone(), config());
        assert!(!manager.kill_sandbox("missing").await);
        manager.create_sandbox("s1", None).await.unwrap();
        assert!(manager.kill_sandbox("s1").await);
        assert!(manager.get_sandbox("s1").await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn get_sandbox_on_unknown_session_is_not_found() {
        let dir = tempdir();
        let manager = SandboxManager::new(dir.clone(), config());
        let err = manager.get_sandbox("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("review-sandbox-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
