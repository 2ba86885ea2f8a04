//! In-memory backend. Same observable semantics as the durable backend,
//! minus persistence — grounded on the original's `InMemoryJobQueue`.

use std::collections::HashMap;

use chrono::Utc;
use review_types::{Job, JobPriority, JobStatus};
use tokio::sync::Mutex;

use crate::error::QueueResult;

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    queue: Vec<String>,
    retry_queue: HashMap<String, chrono::DateTime<Utc>>,
    processing: HashMap<String, chrono::DateTime<Utc>>,
    dead_letter: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, job: Job) -> QueueResult<String> {
        let mut state = self.state.lock().await;
        let id = job.job_id.clone();
        let priority = job.priority;
        state.jobs.insert(id.clone(), job);
        state.queue.push(id.clone());
        let State { queue, jobs, .. } = &mut *state;
        sort_by_priority(queue, jobs);
        let _ = priority;
        Ok(id)
    }

    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    pub async fn update_job(&self, job: Job) -> QueueResult<()> {
        self.state.lock().await.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    pub async fn pop_next_job(&self) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let due: Option<String> = state
            .retry_queue
            .iter()
            .find(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone());

        if let Some(job_id) = due {
            state.retry_queue.remove(&job_id);
            state.processing.insert(job_id.clone(), now);
            return Ok(state.jobs.get(&job_id).cloned());
        }

        if state.queue.is_empty() {
            return Ok(None);
        }
        let job_id = state.queue.remove(0);
        state.processing.insert(job_id.clone(), now);
        Ok(state.jobs.get(&job_id).cloned())
    }

    pub async fn complete_job(&self, mut job: Job, result: serde_json::Value) -> QueueResult<()> {
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        job.error = None;
        let mut state = self.state.lock().await;
        state.processing.remove(&job.job_id);
        state.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    pub async fn fail_job(&self, mut job: Job, error: String) -> QueueResult<()> {
        job.error = Some(error.clone());
        let mut state = self.state.lock().await;
        state.processing.remove(&job.job_id);

        if job.can_retry() {
            let delay = job.next_retry_delay_seconds();
            let next_at = Utc::now() + chrono::Duration::milliseconds((delay * 1000.0) as i64);
            job.next_retry_at = Some(next_at);
            job.retry_count += 1;
            job.status = JobStatus::Retrying;
            job.error_history.push(format!("[{}] {error}", Utc::now().to_rfc3339()));
            state.retry_queue.insert(job.job_id.clone(), next_at);
        } else {
            job.status = JobStatus::Dead;
            job.completed_at = Some(Utc::now());
            state.dead_letter.push(job.job_id.clone());
        }
        state.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    pub async fn get_queue_stats(&self) -> QueueResult<QueueStats> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            pending: state.queue.len(),
            retrying: state.retry_queue.len(),
            processing: state.processing.len(),
            dead: state.dead_letter.len(),
        })
    }

    pub async fn get_dead_jobs(&self, limit: usize) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .dead_letter
            .iter()
            .take(limit)
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect())
    }

    pub async fn retry_dead_job(&self, job_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        job.status = JobStatus::Pending;
        job.retry_count = 0;
        job.error = None;
        job.next_retry_at = None;
        let priority = job.priority;
        state.dead_letter.retain(|id| id != job_id);
        state.queue.push(job_id.to_string());
        let State { queue, jobs, .. } = &mut *state;
        sort_by_priority(queue, jobs);
        let _ = priority;
        Ok(true)
    }

    /// Requeue any job whose `processing` lease has exceeded
    /// `visibility_timeout` — the administrative sweep the spec's Open
    /// Questions section calls for on crashed handlers.
    pub async fn sweep_stale(&self, visibility_timeout: chrono::Duration) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let stale: Vec<String> = state
            .processing
            .iter()
            .filter(|(_, leased_at)| now - **leased_at > visibility_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            state.processing.remove(id);
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Pending;
            }
            state.queue.push(id.clone());
        }
        let State { queue, jobs, .. } = &mut *state;
        sort_by_priority(queue, jobs);
        Ok(stale.len())
    }

    pub fn health_check(&self) -> bool {
        true
    }
}

pub struct QueueStats {
    pub pending: usize,
    pub retrying: usize,
    pub processing: usize,
    pub dead: usize,
}

fn sort_by_priority(queue: &mut [String], jobs: &HashMap<String, Job>) {
    queue.sort_by_key(|id| jobs.get(id).map(|j| j.priority).unwrap_or(JobPriority::Low));
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_types::Job;
    use serde_json::Value;

    fn job(id: &str, priority: JobPriority, max_retries: u32) -> Job {
        let mut j = Job::new(id, "post_review", Value::Null, priority, Utc::now());
        j.max_retries = max_retries;
        j
    }

    #[tokio::test]
    async fn pop_next_job_returns_highest_priority_first() {
        let backend = MemoryBackend::new();
        backend.submit(job("low", JobPriority::Low, 3)).await.unwrap();
        backend.submit(job("high", JobPriority::High, 3)).await.unwrap();
        backend.submit(job("normal", JobPriority::Normal, 3)).await.unwrap();

        let first = backend.pop_next_job().await.unwrap().unwrap();
        assert_eq!(first.job_id, "high");
    }

    #[tokio::test]
    async fn job_reaches_dead_after_max_retries_plus_one_invocations() {
        let backend = MemoryBackend::new();
        backend.submit(job("j1", JobPriority::Normal, 1)).await.unwrap();

        let j = backend.pop_next_job().await.unwrap().unwrap();
        backend.fail_job(j, "boom".into()).await.unwrap(); // invocation 1 -> retrying

        let stats = backend.get_queue_stats().await.unwrap();
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.dead, 0);

        // force the retry to be due
        {
            let mut state = backend.state.lock().await;
            state.retry_queue.insert("j1".into(), Utc::now() - chrono::Duration::seconds(1));
        }
        let j = backend.pop_next_job().await.unwrap().unwrap();
        backend.fail_job(j, "boom again".into()).await.unwrap(); // invocation 2 -> dead

        let stats = backend.get_queue_stats().await.unwrap();
        assert_eq!(stats.dead, 1);
    }

    #[tokio::test]
    async fn max_retries_zero_dead_letters_on_first_failure() {
        let backend = MemoryBackend::new();
        backend.submit(job("j1", JobPriority::Normal, 0)).await.unwrap();
        let j = backend.pop_next_job().await.unwrap().unwrap();
        backend.fail_job(j, "boom".into()).await.unwrap();
        let stats = backend.get_queue_stats().await.unwrap();
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.retrying, 0);
    }

    #[tokio::test]
    async fn retry_dead_job_resets_and_requeues() {
        let backend = MemoryBackend::new();
        backend.submit(job("j1", JobPriority::Normal, 0)).await.unwrap();
        let j = backend.pop_next_job().await.unwrap().unwrap();
        backend.fail_job(j, "boom".into()).await.unwrap();

        assert!(backend.retry_dead_job("j1").await.unwrap());
        let stats = backend.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dead, 0);
    }

    #[tokio::test]
    async fn sweep_stale_requeues_expired_processing_jobs() {
        let backend = MemoryBackend::new();
        backend.submit(job("j1", JobPriority::Normal, 3)).await.unwrap();
        backend.pop_next_job().await.unwrap();

        let requeued = backend.sweep_stale(chrono::Duration::seconds(-1)).await.unwrap();
        assert_eq!(requeued, 1);
        let stats = backend.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 0);
    }
}
