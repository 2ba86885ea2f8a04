//! Environment-driven sandbox provider configuration, matching the
//! `E2B_*` environment variables for the sandbox provider.

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub api_key: Option<String>,
    pub template_id: Option<String>,
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("E2B_API_KEY").ok(),
            template_id: std::env::var("E2B_TEMPLATE_ID").ok(),
            default_timeout_ms: parse_env("E2B_SANDBOX_TIMEOUT_MS", 300_000),
            max_retries: parse_env("E2B_MAX_RETRIES", 3),
            retry_delay_seconds: parse_env("E2B_RETRY_DELAY_SECONDS", 5.0),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
