//! Unified error type for `llm-client`, plus small env-var config helpers.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiLlmError>;

#[derive(Debug, Error)]
pub enum AiLlmError {
    #[error("[llm-client] config error: {0}")]
    Config(#[from] ConfigError),

    #[error("[llm-client] transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("[llm-client] provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid number in {var}: {reason}")]
    InvalidNumber { var: &'static str, reason: &'static str },

    #[error("invalid format in {var}: {reason}")]
    InvalidFormat { var: &'static str, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider configured for this client")]
    InvalidProvider,

    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("unexpected HTTP status {status} from {url}: {snippet}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        snippet: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no choices returned by provider")]
    EmptyChoices,
}

/// Fetches a required, non-empty environment variable.
pub fn must_env(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name).into()),
    }
}

/// Parses an optional `u32` from env (`Ok(None)` if unset/empty).
pub fn env_opt_u32(name: &'static str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var: name, reason: "expected u32" }.into()),
        _ => Ok(None),
    }
}

pub fn make_snippet(text: &str) -> String {
    text.chars().take(240).collect()
}
