//! The concrete environment backing `SandboxManager`.
//!
//! The remote execution provider is an opaque external collaborator; no
//! concrete SDK is part of this workspace's corpus. This
//! implementation backs each session with its own directory on the local
//! filesystem and shells out to `git`/arbitrary commands inside it via
//! `tokio::process::Command` — the same "spawn and collect output" idiom
//! used for git CLI calls elsewhere in the wider review-tooling corpus.
//! Swapping in a real remote-sandbox SDK means replacing this one struct;
//! `SandboxManager` depends only on its public methods.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{Error, SandboxResult};

pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct ProcessProvider {
    root: PathBuf,
}

impl ProcessProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub async fn provision(&self, session_id: &str) -> SandboxResult<PathBuf> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Creation(e.to_string()))?;
        Ok(dir)
    }

    pub async fn teardown(&self, session_id: &str) -> SandboxResult<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
        Ok(())
    }

    pub async fn run(
        &self,
        workdir: &std::path::Path,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
    ) -> SandboxResult<CommandOutput> {
        let fut = Command::new(cmd)
            .args(args)
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Operation(format!("command timed out after {timeout:?}")))?
            .map_err(|e| Error::Operation(e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub async fn read_file(&self, workdir: &std::path::Path, path: &str) -> SandboxResult<String> {
        tokio::fs::read_to_string(workdir.join(path))
            .await
            .map_err(|e| Error::Operation(e.to_string()))
    }

    pub async fn read_file_binary(&self, workdir: &std::path::Path, path: &str) -> SandboxResult<Vec<u8>> {
        tokio::fs::read(workdir.join(path))
            .await
            .map_err(|e| Error::Operation(e.to_string()))
    }

    pub async fn write_file(&self, workdir: &std::path::Path, path: &str, content: &[u8]) -> SandboxResult<()> {
        let target = workdir.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Operation(e.to_string()))?;
        }
        tokio::fs::write(target, content)
            .await
            .map_err(|e| Error::Operation(e.to_string()))
    }

    pub async fn list_files(&self, workdir: &std::path::Path, pattern: Option<&str>) -> SandboxResult<Vec<String>> {
        let output = self
            .run(workdir, "find", &[".", "-type", "f"], Duration::from_secs(30))
            .await?;
        let mut files: Vec<String> = output
            .stdout
            .lines()
            .map(|l| l.trim_start_matches("./").to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if let Some(pattern) = pattern {
            files.retain(|f| f.contains(pattern));
        }
        Ok(files)
    }
}
