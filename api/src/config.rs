//! Environment-driven configuration for the HTTP surface itself. Every
//! collaborator crate (`review-sandbox`, `llm-client`, `kb-client`,
//! `hosting-client`, ...) already owns its own `from_env`; this is just the
//! handful of knobs that belong to `api` alone.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {var}: {reason}")]
    InvalidFormat { var: &'static str, reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `GET /bot/tasks` default `limit` when the query omits one.
    pub default_task_list_limit: usize,
    /// How many finished tasks `TaskRepository` keeps before evicting the
    /// oldest — an in-memory store has no other bound on growth.
    pub task_history_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: std::env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            default_task_list_limit: env_usize("TASK_LIST_DEFAULT_LIMIT", 50)?,
            task_history_limit: env_usize("TASK_HISTORY_LIMIT", 1000)?,
        })
    }
}

fn env_usize(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidFormat { var: key, reason: "expected a non-negative integer" }),
        Err(_) => Ok(default),
    }
}
