//! Environment-driven supervisor configuration.
//!
//! `max_comments` and the sandbox-setup retry budget are the two knobs spec
//! §4.8/§5 name explicitly; everything else in this crate reads its own
//! environment variables directly (mirroring how each collaborator crate
//! already owns its own `*_from_env` constructor).

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_comments: usize,
    pub sandbox_setup_max_attempts: u32,
    pub sandbox_setup_retry_base_secs: f64,
    /// Hard deadline for the parsing-through-posting pipeline, enforced by
    /// `Supervisor::run_review` wrapping `run_staged_pipeline` in
    /// `tokio::time::timeout`. Intent parsing and sandbox setup run outside
    /// this budget since they precede it.
    pub total_budget_secs: u64,
    /// Per-file size cap before a changed file is skipped rather than read
    /// into a worker prompt — original's admission control, carried over.
    pub max_file_size: usize,
    /// Caps how many changed files one review will read/parse; extras are
    /// logged and dropped rather than silently truncated without a trace.
    pub max_files: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_comments: env_usize("REVIEW_MAX_COMMENTS", 20),
            sandbox_setup_max_attempts: env_u32("SANDBOX_SETUP_MAX_ATTEMPTS", 3),
            sandbox_setup_retry_base_secs: env_f64("SANDBOX_SETUP_RETRY_BASE_SECS", 2.0),
            total_budget_secs: env_u64("SUPERVISOR_TOTAL_BUDGET_SECS", 600),
            max_file_size: env_usize("SUPERVISOR_MAX_FILE_SIZE", 500_000),
            max_files: env_usize("SUPERVISOR_MAX_FILES", 100),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
