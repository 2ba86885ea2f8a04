use thiserror::Error;

pub type QueueResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no handler registered for job type: {0}")]
    NoHandler(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
