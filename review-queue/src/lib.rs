//! Priority job queue with retry/backoff/dead-letter (C2).
//!
//! Grounded on `backend/agent/services/job_queue.py`: the `MemoryBackend`
//! mirrors `InMemoryJobQueue` field-for-field, and the optional
//! `redis-backend` feature mirrors `RedisJobQueue`'s key layout exactly
//! (`openrabbit:jobs:*`). Both backends are driven through the same
//! `JobQueue` facade so they present byte-identical observable semantics
//! to the caller.
//!
//! Handler registration is a small type-erased registry (one boxed async
//! closure per `job_type`) rather than the enum-dispatch used for the LLM
//! and hosting-platform clients elsewhere in this workspace: job types are
//! registered dynamically at startup by whichever crate owns them, not a
//! fixed, closed set known at compile time, so a dispatch table is the
//! right tool here.

pub mod error;
mod memory;
#[cfg(feature = "redis-backend")]
mod redis_backend;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use review_types::{Job, JobPriority};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

pub use error::{Error, QueueResult};
pub use memory::QueueStats;

use memory::MemoryBackend;
#[cfg(feature = "redis-backend")]
use redis_backend::RedisBackend;

type Handler = Arc<dyn Fn(Job) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

enum Backend {
    Memory(MemoryBackend),
    #[cfg(feature = "redis-backend")]
    Redis(RedisBackend),
}

/// Runtime selection of the durable vs. in-memory backend. By design,
/// a durable-backend health-check failure at startup falls back to
/// in-memory rather than failing process startup.
pub struct JobQueue {
    backend: Backend,
    handlers: tokio::sync::RwLock<HashMap<String, Handler>>,
}

impl JobQueue {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::new()),
            handlers: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    #[cfg(feature = "redis-backend")]
    pub async fn connect_or_fallback(redis_url: &str) -> Self {
        match RedisBackend::connect(redis_url).await {
            Ok(backend) if backend.health_check().await => {
                info!(redis_url, "job queue using redis backend");
                Self {
                    backend: Backend::Redis(backend),
                    handlers: tokio::sync::RwLock::new(HashMap::new()),
                }
            }
            Ok(_) | Err(_) => {
                warn!("redis health check failed, falling back to in-memory job queue");
                Self::in_memory()
            }
        }
    }

    pub async fn register_handler<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        let job_type = job_type.into();
        self.handlers
            .write()
            .await
            .insert(job_type.clone(), Arc::new(move |job| Box::pin(handler(job))));
        info!(job_type, "registered job handler");
    }

    #[instrument(skip(self, payload), fields(job_type = %job_type))]
    pub async fn submit(
        &self,
        job_type: &str,
        payload: Value,
        priority: JobPriority,
        session_id: Option<String>,
        correlation_id: Option<String>,
        max_retries: u32,
    ) -> QueueResult<String> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut job = Job::new(&job_id, job_type, payload, priority, Utc::now());
        job.session_id = session_id;
        job.correlation_id = correlation_id;
        job.max_retries = max_retries;

        let id = match &self.backend {
            Backend::Memory(b) => b.submit(job).await?,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.submit(job).await?,
        };
        info!(job_id = %id, "job submitted");
        Ok(id)
    }

    pub async fn pop_next_job(&self) -> QueueResult<Option<Job>> {
        match &self.backend {
            Backend::Memory(b) => b.pop_next_job().await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.pop_next_job().await,
        }
    }

    pub async fn complete_job(&self, job: Job, result: Value) -> QueueResult<()> {
        match &self.backend {
            Backend::Memory(b) => b.complete_job(job, result).await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.complete_job(job, result).await,
        }
    }

    pub async fn fail_job(&self, job: Job, error: String) -> QueueResult<()> {
        match &self.backend {
            Backend::Memory(b) => b.fail_job(job, error).await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.fail_job(job, error).await,
        }
    }

    pub async fn get_queue_stats(&self) -> QueueResult<QueueStats> {
        match &self.backend {
            Backend::Memory(b) => b.get_queue_stats().await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.get_queue_stats().await,
        }
    }

    pub async fn get_dead_jobs(&self, limit: usize) -> QueueResult<Vec<Job>> {
        match &self.backend {
            Backend::Memory(b) => b.get_dead_jobs(limit).await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.get_dead_jobs(limit).await,
        }
    }

    pub async fn retry_dead_job(&self, job_id: &str) -> QueueResult<bool> {
        match &self.backend {
            Backend::Memory(b) => b.retry_dead_job(job_id).await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(b) => b.retry_dead_job(job_id).await,
        }
    }

    /// Requeue jobs whose in-flight lease has expired — the sweep policy
    /// left unresolved upstream, only meaningful for the
    /// in-memory backend's explicit lease map (the Redis backend's
    /// `processing` set has no lease timestamp in the original and is left
    /// for a future administrative tool, matching upstream).
    pub async fn sweep_stale(&self, visibility_timeout: Duration) -> QueueResult<usize> {
        match &self.backend {
            Backend::Memory(b) => b.sweep_stale(visibility_timeout).await,
            #[cfg(feature = "redis-backend")]
            Backend::Redis(_) => Ok(0),
        }
    }

    /// Pop, dispatch, and complete/fail exactly one job. Handler panics are
    /// not caught — callers embedding this in `run_worker` rely on handler
    /// code never panicking, same as the original relying on `except
    /// Exception` around a handler that cannot itself crash the process.
    #[instrument(skip(self))]
    pub async fn process_one(&self) -> QueueResult<bool> {
        let Some(job) = self.pop_next_job().await? else {
            return Ok(false);
        };

        let handler = self.handlers.read().await.get(&job.job_type).cloned();
        let Some(handler) = handler else {
            error!(job_type = %job.job_type, "no handler registered");
            self.fail_job(job.clone(), format!("no handler for job type: {}", job.job_type))
                .await?;
            return Ok(true);
        };

        match handler(job.clone()).await {
            Ok(result) => self.complete_job(job, result).await?,
            Err(e) => self.fail_job(job, e).await?,
        }
        Ok(true)
    }

    /// Worker loop: process jobs until told to stop, sleeping
    /// `poll_interval` whenever the queue is empty.
    pub async fn run_worker(&self, poll_interval: std::time::Duration, stop: &tokio::sync::Notify) {
        info!("job queue worker started");
        loop {
            let processed = tokio::select! {
                _ = stop.notified() => break,
                result = self.process_one() => result,
            };
            match processed {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(poll_interval).await,
                Err(e) => {
                    error!(error = %e, "worker loop error");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
        info!("job queue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn submit_then_process_one_invokes_registered_handler() {
        let queue = JobQueue::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        queue
            .register_handler("post_review", move |_job| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .await;

        queue
            .submit("post_review", Value::Null, JobPriority::Normal, None, None, 3)
            .await
            .unwrap();

        assert!(queue.process_one().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_job_instead_of_panicking() {
        let queue = JobQueue::in_memory();
        queue
            .submit("unregistered", Value::Null, JobPriority::Normal, None, None, 0)
            .await
            .unwrap();
        assert!(queue.process_one().await.unwrap());
        let stats = queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.dead, 1);
    }

    #[tokio::test]
    async fn process_one_returns_false_on_empty_queue() {
        let queue = JobQueue::in_memory();
        assert!(!queue.process_one().await.unwrap());
    }
}
