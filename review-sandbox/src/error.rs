use thiserror::Error;

pub type SandboxResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sandbox creation failed after retries: {0}")]
    Creation(String),
    #[error("sandbox operation failed: {0}")]
    Operation(String),
    #[error("sandbox session not found: {0}")]
    NotFound(String),
    #[error("sandbox session {0} is in a terminal state")]
    Terminal(String),
}
