//! The work unit persisted by the Job Queue (C2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobPriority {
    High = 1,
    Normal = 5,
    Low = 10,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_type: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub error: Option<String>,
    pub error_history: Vec<String>,
    pub result: Option<Value>,
}

impl Job {
    pub fn new(
        job_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            payload,
            priority,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            retry_delay_seconds: 5.0,
            backoff_multiplier: 2.0,
            next_retry_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            session_id: None,
            correlation_id: None,
            error: None,
            error_history: Vec::new(),
            result: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// `retry_delay * backoff_multiplier^retry_count`.
    pub fn next_retry_delay_seconds(&self) -> f64 {
        self.retry_delay_seconds * self.backoff_multiplier.powi(self.retry_count as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn can_retry_respects_max_retries() {
        let mut job = Job::new("j1", "post_review", Value::Null, JobPriority::Normal, now());
        job.max_retries = 1;
        assert!(job.can_retry());
        job.retry_count = 1;
        assert!(!job.can_retry());
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let mut job = Job::new("j1", "post_review", Value::Null, JobPriority::Normal, now());
        job.retry_delay_seconds = 5.0;
        job.backoff_multiplier = 2.0;
        assert_eq!(job.next_retry_delay_seconds(), 5.0);
        job.retry_count = 1;
        assert_eq!(job.next_retry_delay_seconds(), 10.0);
        job.retry_count = 2;
        assert_eq!(job.next_retry_delay_seconds(), 20.0);
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = Job::new("j1", "post_review", Value::Null, JobPriority::High, now());
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.job_id, job.job_id);
        assert_eq!(decoded.priority, job.priority);
    }

    #[test]
    fn priority_orders_high_before_low() {
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Low);
    }
}
