//! Checkpoint Store (C4): per-session append-only log of completed stages.
//!
//! Grounded on `mr-reviewer::cache`'s file-based JSON idiom (same
//! `*_DIR` env-override pattern, same "write whole JSON document to a
//! deterministic path" approach) generalized from a read-mostly diff cache
//! into a write-through per-session log. Writes for one `session_id` are
//! serialized through a per-session `tokio::sync::Mutex`, matching the
//! "one writer per session" invariant.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use review_types::{Checkpoint, Step};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub type CheckpointResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn store_root() -> PathBuf {
    std::env::var("CHECKPOINT_STORE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("code_data/checkpoints"))
}

pub struct CheckpointStore {
    root: PathBuf,
    /// One lock per session so concurrent reviews never contend with each
    /// other, but writes within a review are always serialized.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(store_root())
    }
}

impl CheckpointStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    pub async fn create_checkpoint(&self, session_id: &str) -> CheckpointResult<Checkpoint> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        let checkpoint = Checkpoint::new(checkpoint_id, session_id, Utc::now());
        self.write(&checkpoint).await?;
        Ok(checkpoint)
    }

    pub async fn load(&self, session_id: &str) -> CheckpointResult<Option<Checkpoint>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Idempotent: marking an already-complete step round-trips the
    /// checkpoint unchanged.
    pub async fn mark_step_complete(&self, checkpoint: &mut Checkpoint, step: Step) -> CheckpointResult<()> {
        let lock = self.session_lock(&checkpoint.session_id).await;
        let _guard = lock.lock().await;
        checkpoint.mark_step_complete(step);
        self.write(checkpoint).await
    }

    pub fn is_step_complete(&self, checkpoint: &Checkpoint, step: Step) -> bool {
        checkpoint.is_step_complete(step)
    }

    pub async fn snapshot_step(&self, checkpoint: &mut Checkpoint, step: Step, output: Value) -> CheckpointResult<()> {
        let lock = self.session_lock(&checkpoint.session_id).await;
        let _guard = lock.lock().await;
        match step {
            Step::IntentParsing => checkpoint.snapshots.intent = Some(output),
            Step::SandboxSetup => {} // no dedicated slot; repo_path/valid_lines live on the session itself
            Step::Parsing => checkpoint.snapshots.parser_output = Some(output),
            Step::Review => checkpoint.snapshots.review_output = Some(output),
            Step::Tests => checkpoint.snapshots.test_output = Some(output),
            Step::Aggregation => checkpoint.snapshots.review_output = Some(output),
            Step::Formatting | Step::Posting => {}
        }
        self.write(checkpoint).await
    }

    /// `kb_context` is computed between the `Parsing` and `Review` stages,
    /// not tied to either one's `Step::ORDER` slot, so it gets its own write
    /// instead of overloading `snapshot_step`.
    pub async fn snapshot_kb_context(&self, checkpoint: &mut Checkpoint, kb_context: Value) -> CheckpointResult<()> {
        let lock = self.session_lock(&checkpoint.session_id).await;
        let _guard = lock.lock().await;
        checkpoint.snapshots.kb_context = Some(kb_context);
        self.write(checkpoint).await
    }

    pub async fn record_error(&self, checkpoint: &mut Checkpoint, error: impl Into<String>) -> CheckpointResult<()> {
        let lock = self.session_lock(&checkpoint.session_id).await;
        let _guard = lock.lock().await;
        checkpoint.last_error = Some(error.into());
        checkpoint.retry_count += 1;
        self.write(checkpoint).await
    }

    async fn write(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let path = self.path_for(&checkpoint.session_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&path, json).await?;
        debug!(session_id = %checkpoint.session_id, step = ?checkpoint.current_step, "checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("review-checkpoint-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = tempdir();
        let store = CheckpointStore::new(dir.clone());
        let cp = store.create_checkpoint("s1").await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, cp.checkpoint_id);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn mark_step_complete_is_durable_and_idempotent() {
        let dir = tempdir();
        let store = CheckpointStore::new(dir.clone());
        let mut cp = store.create_checkpoint("s1").await.unwrap();
        store.mark_step_complete(&mut cp, Step::IntentParsing).await.unwrap();
        store.mark_step_complete(&mut cp, Step::IntentParsing).await.unwrap();

        let reloaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(reloaded.completed_steps, vec![Step::IntentParsing]);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn load_of_unknown_session_returns_none() {
        let dir = tempdir();
        let store = CheckpointStore::new(dir.clone());
        assert!(store.load("nope").await.unwrap().is_none());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
