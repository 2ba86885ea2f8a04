//! Durable backend over Redis sorted sets, grounded on the original's
//! `RedisJobQueue`: one sorted set for the ready queue (score = priority),
//! one for the retry queue (score = due timestamp), a hash per job, a set
//! for in-flight jobs, and a list for the dead-letter queue. Key prefixes
//! match the original exactly so an operator inspecting Redis directly
//! recognizes the layout.

use chrono::Utc;
use redis::AsyncCommands;
use review_types::Job;

use crate::error::{Error, QueueResult};
use crate::memory::QueueStats;

const QUEUE_KEY: &str = "openrabbit:jobs:queue";
const RETRY_QUEUE_KEY: &str = "openrabbit:jobs:retry";
const JOB_PREFIX: &str = "openrabbit:jobs:data:";
const DEAD_LETTER_KEY: &str = "openrabbit:jobs:dead";
const PROCESSING_KEY: &str = "openrabbit:jobs:processing";
const JOB_TTL_SECONDS: i64 = 48 * 3600;

pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url).map_err(to_backend_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(to_backend_err)?;
        Ok(Self { manager })
    }

    fn job_key(job_id: &str) -> String {
        format!("{JOB_PREFIX}{job_id}")
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
    }

    pub async fn submit(&self, job: Job) -> QueueResult<String> {
        let mut conn = self.manager.clone();
        let id = job.job_id.clone();
        let priority = job.priority as i64;
        let payload = serde_json::to_string(&job)?;
        conn.set_ex::<_, _, ()>(Self::job_key(&id), payload, JOB_TTL_SECONDS as u64)
            .await
            .map_err(to_backend_err)?;
        conn.zadd::<_, _, _, ()>(QUEUE_KEY, &id, priority)
            .await
            .map_err(to_backend_err)?;
        Ok(id)
    }

    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        let mut conn = self.manager.clone();
        let data: Option<String> = conn.get(Self::job_key(job_id)).await.map_err(to_backend_err)?;
        match data {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn update_job(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(job)?;
        conn.set_ex::<_, _, ()>(Self::job_key(&job.job_id), payload, JOB_TTL_SECONDS as u64)
            .await
            .map_err(to_backend_err)
    }

    pub async fn pop_next_job(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp();

        let due: Vec<String> = conn
            .zrangebyscore_limit(RETRY_QUEUE_KEY, 0, now, 0, 1)
            .await
            .map_err(to_backend_err)?;

        if let Some(job_id) = due.into_iter().next() {
            conn.zrem::<_, _, ()>(RETRY_QUEUE_KEY, &job_id).await.map_err(to_backend_err)?;
            if let Some(job) = self.get_job(&job_id).await? {
                conn.sadd::<_, _, ()>(PROCESSING_KEY, &job_id).await.map_err(to_backend_err)?;
                return Ok(Some(job));
            }
        }

        let next: Vec<String> = conn.zrange(QUEUE_KEY, 0, 0).await.map_err(to_backend_err)?;
        let Some(job_id) = next.into_iter().next() else {
            return Ok(None);
        };
        conn.zrem::<_, _, ()>(QUEUE_KEY, &job_id).await.map_err(to_backend_err)?;
        conn.sadd::<_, _, ()>(PROCESSING_KEY, &job_id).await.map_err(to_backend_err)?;
        self.get_job(&job_id).await
    }

    pub async fn complete_job(&self, mut job: Job, result: serde_json::Value) -> QueueResult<()> {
        job.status = review_types::JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        job.error = None;
        self.update_job(&job).await?;
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(PROCESSING_KEY, &job.job_id).await.map_err(to_backend_err)
    }

    pub async fn fail_job(&self, mut job: Job, error: String) -> QueueResult<()> {
        job.error = Some(error.clone());
        let mut conn = self.manager.clone();

        if job.can_retry() {
            let delay = job.next_retry_delay_seconds();
            let next_at = Utc::now() + chrono::Duration::milliseconds((delay * 1000.0) as i64);
            job.next_retry_at = Some(next_at);
            job.retry_count += 1;
            job.status = review_types::JobStatus::Retrying;
            job.error_history.push(format!("[{}] {error}", Utc::now().to_rfc3339()));
            self.update_job(&job).await?;
            conn.zadd::<_, _, _, ()>(RETRY_QUEUE_KEY, &job.job_id, next_at.timestamp())
                .await
                .map_err(to_backend_err)?;
        } else {
            job.status = review_types::JobStatus::Dead;
            job.completed_at = Some(Utc::now());
            self.update_job(&job).await?;
            conn.lpush::<_, _, ()>(DEAD_LETTER_KEY, &job.job_id).await.map_err(to_backend_err)?;
        }
        conn.srem::<_, _, ()>(PROCESSING_KEY, &job.job_id).await.map_err(to_backend_err)
    }

    pub async fn get_queue_stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.manager.clone();
        let pending: usize = conn.zcard(QUEUE_KEY).await.map_err(to_backend_err)?;
        let retrying: usize = conn.zcard(RETRY_QUEUE_KEY).await.map_err(to_backend_err)?;
        let processing: usize = conn.scard(PROCESSING_KEY).await.map_err(to_backend_err)?;
        let dead: usize = conn.llen(DEAD_LETTER_KEY).await.map_err(to_backend_err)?;
        Ok(QueueStats { pending, retrying, processing, dead })
    }

    pub async fn get_dead_jobs(&self, limit: usize) -> QueueResult<Vec<Job>> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .lrange(DEAD_LETTER_KEY, 0, limit as isize - 1)
            .await
            .map_err(to_backend_err)?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub async fn retry_dead_job(&self, job_id: &str) -> QueueResult<bool> {
        let Some(mut job) = self.get_job(job_id).await? else {
            return Ok(false);
        };
        job.status = review_types::JobStatus::Pending;
        job.retry_count = 0;
        job.error = None;
        job.next_retry_at = None;
        let priority = job.priority as i64;
        self.update_job(&job).await?;

        let mut conn = self.manager.clone();
        conn.lrem::<_, _, ()>(DEAD_LETTER_KEY, 1, job_id).await.map_err(to_backend_err)?;
        conn.zadd::<_, _, _, ()>(QUEUE_KEY, job_id, priority).await.map_err(to_backend_err)?;
        Ok(true)
    }
}

fn to_backend_err(e: redis::RedisError) -> Error {
    Error::Backend(e.to_string())
}
