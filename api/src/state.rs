//! Shared application state handed to every route.

use std::sync::Arc;

use hosting_client::HostingClient;
use kb_client::KbClient;
use llm_client::LlmClient;
use review_checkpoint::CheckpointStore;
use review_queue::JobQueue;
use review_sandbox::SandboxManager;
use review_supervisor::Supervisor;

use crate::config::AppConfig;
use crate::tasks::TaskRepository;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub supervisor: Arc<Supervisor>,
    pub sandbox: Arc<SandboxManager>,
    pub queue: Arc<JobQueue>,
    pub llm: Option<Arc<LlmClient>>,
    pub tasks: Arc<TaskRepository>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        supervisor: Arc<Supervisor>,
        sandbox: Arc<SandboxManager>,
        queue: Arc<JobQueue>,
        llm: Option<Arc<LlmClient>>,
    ) -> Self {
        let tasks = TaskRepository::new(config.task_history_limit);
        Self { config, supervisor, sandbox, queue, llm, tasks }
    }
}

/// Builds every collaborator from its own `from_env`/`default`, wires the
/// `post_review` job handler into `hosting-client`, and returns the state the
/// router needs. Split out of `start()` so tests can build a state without
/// binding a real listener.
pub async fn build_from_env() -> Result<AppState, crate::error_handler::AppError> {
    let config = AppConfig::from_env()?;

    let sandbox = Arc::new(SandboxManager::new(sandbox_root(), review_sandbox::SandboxConfig::from_env()));
    let checkpoints = Arc::new(CheckpointStore::default());
    let queue = Arc::new(if use_redis_queue() {
        redis_queue().await
    } else {
        JobQueue::in_memory()
    });

    let llm = match LlmClient::from_env() {
        Ok(llm) => Some(Arc::new(llm)),
        Err(e) => {
            tracing::warn!(error = %e, "no usable LLM configuration, review/test-generation stages will produce empty output");
            None
        }
    };
    let kb = match KbClient::from_env() {
        Ok(kb) => Some(Arc::new(kb)),
        Err(e) => {
            tracing::warn!(error = %e, "knowledge base client unavailable, continuing without KB context");
            None
        }
    };

    let supervisor_config = review_supervisor::SupervisorConfig::default();
    let supervisor = Arc::new(Supervisor::new(sandbox.clone(), checkpoints, queue.clone(), llm.clone(), kb, supervisor_config));

    register_posting_handler(&queue).await;

    Ok(AppState::new(config, supervisor, sandbox, queue, llm))
}

fn sandbox_root() -> std::path::PathBuf {
    std::env::var("SANDBOX_ROOT").map(std::path::PathBuf::from).unwrap_or_else(|_| std::path::PathBuf::from("code_data/sandboxes"))
}

fn use_redis_queue() -> bool {
    std::env::var("USE_REDIS").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false)
}

#[cfg(feature = "redis-backend")]
async fn redis_queue() -> JobQueue {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    JobQueue::connect_or_fallback(&url).await
}

#[cfg(not(feature = "redis-backend"))]
async fn redis_queue() -> JobQueue {
    tracing::warn!("USE_REDIS is set but the redis-backend feature isn't compiled in, falling back to in-memory");
    JobQueue::in_memory()
}

/// Translates a queued `post_review` payload (built in
/// `review-supervisor::stage_posting`) into a `hosting-client` call. Runs
/// inside whatever worker drives `JobQueue::process_one`/`run_worker`.
async fn register_posting_handler(queue: &Arc<JobQueue>) {
    let hosting = match HostingClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to build hosting client, post_review jobs will fail until this is fixed");
            return;
        }
    };

    queue
        .register_handler("post_review", move |job| {
            let hosting = hosting.clone();
            async move { handle_post_review(hosting, job).await }
        })
        .await;
}

async fn handle_post_review(hosting: Arc<HostingClient>, job: review_types::Job) -> Result<serde_json::Value, String> {
    let payload = job.payload;
    let owner = payload.get("owner").and_then(|v| v.as_str()).ok_or("post_review payload missing owner")?;
    let repo = payload.get("repo").and_then(|v| v.as_str()).ok_or("post_review payload missing repo")?;
    let pull_number = payload.get("pull_number").and_then(|v| v.as_u64()).ok_or("post_review payload missing pull_number")?;
    let installation_id = payload.get("installation_id").and_then(|v| v.as_i64()).map(|v| v.to_string()).unwrap_or_default();
    let formatted = payload
        .get("formatted_review")
        .cloned()
        .ok_or("post_review payload missing formatted_review")?;
    let formatted: review_types::formatted::FormattedReview = serde_json::from_value(formatted).map_err(|e| e.to_string())?;

    let request = hosting_client::TriggerReviewRequest::from_formatted(owner, repo, pull_number, &installation_id, &formatted);
    hosting.trigger_review(&request).await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({"posted": true}))
}
