//! In-memory task repository: `/bot/review`, `/bot/create-unit-tests`, and
//! `/bot/generate-pr-tests` all create a task here and return its id
//! immediately; a background task updates the entry when the work finishes.
//!
//! Grounded on `bot.py`'s module-level `task_repository` singleton: same
//! `pending -> running -> completed|failed` lifecycle, same
//! `list_tasks(status, limit)`/`delete_task` surface. Unlike the original,
//! which never evicts, this one caps retained history at
//! `AppConfig::task_history_limit` and drops the oldest completed/failed
//! entries once history grows past it — an in-memory Rust process has no
//! other backstop against unbounded growth.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub kind: &'static str,
    pub status: TaskStatus,
    pub owner: String,
    pub repo: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only populated for `create-unit-tests` tasks, mirroring `bot.py`'s
    /// `TaskResponse.test_branch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_branch: Option<String>,
}

impl Task {
    fn new(task_id: String, kind: &'static str, owner: String, repo: String) -> Self {
        Self {
            task_id,
            kind,
            status: TaskStatus::Pending,
            owner,
            repo,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            test_branch: None,
        }
    }
}

struct Inner {
    tasks: HashMap<String, Task>,
    /// Insertion order, oldest first — used for the history-limit eviction.
    order: Vec<String>,
}

pub struct TaskRepository {
    inner: RwLock<Inner>,
    history_limit: usize,
}

impl TaskRepository {
    pub fn new(history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner { tasks: HashMap::new(), order: Vec::new() }),
            history_limit,
        })
    }

    pub async fn create_review_task(&self, task_id: &str, owner: &str, repo: &str) {
        self.insert(Task::new(task_id.to_string(), "review", owner.to_string(), repo.to_string())).await;
    }

    pub async fn create_unit_test_task(&self, task_id: &str, owner: &str, repo: &str, test_branch: &str) {
        let mut task = Task::new(task_id.to_string(), "create_unit_tests", owner.to_string(), repo.to_string());
        task.test_branch = Some(test_branch.to_string());
        self.insert(task).await;
    }

    pub async fn create_pr_test_task(&self, task_id: &str, owner: &str, repo: &str) {
        self.insert(Task::new(task_id.to_string(), "generate_pr_tests", owner.to_string(), repo.to_string())).await;
    }

    async fn insert(&self, task: Task) {
        let mut inner = self.inner.write().await;
        inner.order.push(task.task_id.clone());
        inner.tasks.insert(task.task_id.clone(), task);
        self.evict_if_needed(&mut inner);
    }

    fn evict_if_needed(&self, inner: &mut Inner) {
        while inner.order.len() > self.history_limit {
            let oldest = inner.order.remove(0);
            inner.tasks.remove(&oldest);
        }
    }

    pub async fn mark_running(&self, task_id: &str) {
        if let Some(task) = self.inner.write().await.tasks.get_mut(task_id) {
            task.status = TaskStatus::Running;
        }
    }

    pub async fn mark_completed(&self, task_id: &str, result: Value) {
        if let Some(task) = self.inner.write().await.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.result = Some(result);
        }
    }

    pub async fn mark_failed(&self, task_id: &str, error: impl Into<String>) {
        if let Some(task) = self.inner.write().await.tasks.get_mut(task_id) {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            task.error = Some(error.into());
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.read().await.tasks.get(task_id).cloned()
    }

    pub async fn list_tasks(&self, status: Option<&str>, limit: usize) -> Vec<Task> {
        let wanted = status.and_then(TaskStatus::parse);
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| wanted.map_or(true, |s| t.status == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn delete_task(&self, task_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.tasks.remove(task_id).is_none() {
            return false;
        }
        inner.order.retain(|id| id != task_id);
        true
    }
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = TaskRepository::new(10);
        repo.create_review_task("t1", "acme", "widgets").await;
        let task = repo.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.owner, "acme");
    }

    #[tokio::test]
    async fn mark_completed_sets_result_and_timestamp() {
        let repo = TaskRepository::new(10);
        repo.create_review_task("t1", "acme", "widgets").await;
        repo.mark_running("t1").await;
        repo.mark_completed("t1", serde_json::json!({"files_reviewed": 3})).await;
        let task = repo.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.result.unwrap()["files_reviewed"], 3);
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status_and_limit() {
        let repo = TaskRepository::new(10);
        repo.create_review_task("t1", "acme", "widgets").await;
        repo.create_review_task("t2", "acme", "widgets").await;
        repo.mark_failed("t2", "boom").await;

        let failed = repo.list_tasks(Some("failed"), 50).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_id, "t2");

        let all = repo.list_tasks(None, 1).await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn delete_task_removes_it_and_reports_absence() {
        let repo = TaskRepository::new(10);
        repo.create_review_task("t1", "acme", "widgets").await;
        assert!(repo.delete_task("t1").await);
        assert!(!repo.delete_task("t1").await);
        assert!(repo.get_task("t1").await.is_none());
    }

    #[tokio::test]
    async fn history_limit_evicts_the_oldest_task() {
        let repo = TaskRepository::new(2);
        repo.create_review_task("t1", "acme", "widgets").await;
        repo.create_review_task("t2", "acme", "widgets").await;
        repo.create_review_task("t3", "acme", "widgets").await;
        assert!(repo.get_task("t1").await.is_none());
        assert!(repo.get_task("t2").await.is_some());
        assert!(repo.get_task("t3").await.is_some());
    }
}
