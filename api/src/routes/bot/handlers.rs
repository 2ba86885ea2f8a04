//! `/bot/*` handlers: build a request, hand it to a collaborator crate,
//! return its id. Grounded on `bot.py`'s router of the same name.

use axum::Json;
use axum::extract::{Path, Query, State};
use tracing::{error, info};

use review_types::request::FileInfo;
use review_types::ReviewRequest;

use crate::error_handler::{AppError, AppResult};
use crate::routes::bot::dto::{HealthResponseDto, PrUnitTestRequestDto, ReviewRequestDto, TaskListQuery, TaskResponseDto, UnitTestRequestDto};
use crate::state::AppState;

pub async fn health() -> Json<HealthResponseDto> {
    Json(HealthResponseDto { status: "healthy", service: "openrabbit-backend" })
}

/// `POST /bot/review`. Creates a task, spawns the review as its own
/// cooperative task so concurrent reviews don't block each other, and
/// returns immediately.
pub async fn trigger_review(State(state): State<AppState>, Json(body): Json<ReviewRequestDto>) -> Json<TaskResponseDto> {
    let task_id = uuid::Uuid::new_v4().to_string();
    info!(task_id, owner = %body.owner, repo = %body.repo, pr_number = body.pr_number, "review request received");

    state.tasks.create_review_task(&task_id, &body.owner, &body.repo).await;

    let request = ReviewRequest {
        session_id: task_id.clone(),
        owner: body.owner.clone(),
        repo: body.repo.clone(),
        pr_number: body.pr_number,
        branch: body.branch,
        base_branch: body.base_branch,
        head_owner: body.head_owner,
        head_repo: body.head_repo,
        files: body.changed_files.unwrap_or_default().into_iter().map(FileInfo::new).collect(),
        user_request: "Review this pull request for best practices, bugs, and security issues".to_string(),
        installation_id: if body.installation_id == 0 { None } else { Some(body.installation_id as i64) },
        test_mode: body.test_mode,
        dry_run: body.dry_run,
    };

    let supervisor = state.supervisor.clone();
    let tasks = state.tasks.clone();
    let spawned_task_id = task_id.clone();
    tokio::spawn(async move {
        tasks.mark_running(&spawned_task_id).await;
        let outcome = supervisor.run_review(&request).await;
        match outcome.status {
            Some(review_supervisor::TaskStatus::Completed) => {
                let result = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
                tasks.mark_completed(&spawned_task_id, result).await;
            }
            _ => {
                error!(task_id = %spawned_task_id, error = ?outcome.error, "review task failed");
                tasks.mark_failed(&spawned_task_id, outcome.error.unwrap_or_else(|| "review failed".to_string())).await;
            }
        }
    });

    Json(TaskResponseDto {
        task_id: task_id.clone(),
        status: "pending",
        message: format!("Review started for {}/{}#{}", body.owner, body.repo, body.pr_number),
        test_branch: None,
    })
}

/// `POST /bot/create-unit-tests`. Unlike `/bot/review`, this has no PR diff
/// to drive off of — it clones a single branch and generates tests for
/// whatever the worker's file discovery turns up. There is no collaborator
/// in this workspace capable of committing the result back to the branch
/// (`hosting-client` only posts review envelopes); the generated tests are
/// reported on the task's `result` field for the caller to apply.
pub async fn create_unit_tests(State(state): State<AppState>, Json(body): Json<UnitTestRequestDto>) -> Json<TaskResponseDto> {
    let task_id = uuid::Uuid::new_v4().to_string();
    let test_branch = format!("openrabbit/tests-{}", body.issue_number);
    info!(task_id, owner = %body.owner, repo = %body.repo, "unit test task created");

    state.tasks.create_unit_test_task(&task_id, &body.owner, &body.repo, &test_branch).await;

    let state_clone = state.clone();
    let spawned_task_id = task_id.clone();
    let owner = body.owner.clone();
    let repo = body.repo.clone();
    let branch = body.branch.clone();
    tokio::spawn(async move {
        generate_tests_for_branch(state_clone, spawned_task_id, owner, repo, branch, None).await;
    });

    Json(TaskResponseDto {
        task_id,
        status: "pending",
        message: format!("Unit test generation started for {}/{}", body.owner, body.repo),
        test_branch: Some(test_branch),
    })
}

/// `POST /bot/generate-pr-tests`. Narrower than `create-unit-tests`: the
/// caller already knows which files need coverage (`target_files`), so this
/// skips discovery and generates tests only for those.
pub async fn generate_pr_tests(State(state): State<AppState>, Json(body): Json<PrUnitTestRequestDto>) -> Json<TaskResponseDto> {
    let task_id = uuid::Uuid::new_v4().to_string();
    info!(task_id, owner = %body.owner, repo = %body.repo, pr_number = body.pr_number, target_files = ?body.target_files, "PR unit test request received");

    state.tasks.create_pr_test_task(&task_id, &body.owner, &body.repo).await;

    let state_clone = state.clone();
    let spawned_task_id = task_id.clone();
    let owner = body.owner.clone();
    let repo = body.repo.clone();
    let branch = body.branch.clone();
    let target_files = body.target_files.clone();
    tokio::spawn(async move {
        generate_tests_for_branch(state_clone, spawned_task_id, owner, repo, branch, Some(target_files)).await;
    });

    Json(TaskResponseDto {
        task_id,
        status: "pending",
        message: format!("Unit test generation started for {}/{}#{}", body.owner, body.repo, body.pr_number),
        test_branch: None,
    })
}

/// Shared background body for both unit-test endpoints: clone the branch
/// into a scoped sandbox, parse the target files (or everything the sandbox
/// holds, when no explicit list was requested), generate tests, and record
/// the result on the task.
async fn generate_tests_for_branch(
    state: AppState,
    task_id: String,
    owner: String,
    repo: String,
    branch: String,
    target_files: Option<Vec<String>>,
) {
    state.tasks.mark_running(&task_id).await;

    let outcome: Result<serde_json::Value, String> = async {
        let scoped = review_sandbox::ScopedSandbox::acquire(state.sandbox.clone(), &task_id, None)
            .await
            .map_err(|e| e.to_string())?;

        let repo_url = format!("https://github.com/{owner}/{repo}.git");
        let clone_result = state.sandbox.clone_repo(&task_id, &repo_url, &branch, 1).await;
        if let Err(e) = clone_result {
            scoped.release().await;
            return Err(e.to_string());
        }

        let paths = match &target_files {
            Some(files) => files.clone(),
            None => state.sandbox.list_files(&task_id, None).await.map_err(|e| e.to_string())?,
        };

        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            let mut file = FileInfo::new(path.clone());
            if let Ok(content) = state.sandbox.read_file(&task_id, path).await {
                file.content = Some(content);
            }
            files.push(file);
        }

        let parser_output = review_workers::parse_files(&files).await;
        let test_output = match &state.llm {
            Some(llm) => review_workers::generate_tests(llm, &parser_output, &paths).await,
            None => {
                scoped.release().await;
                return Err("no LLM configured, cannot generate tests".to_string());
            }
        };

        scoped.release().await;
        serde_json::to_value(&test_output).map_err(|e| e.to_string())
    }
    .await;

    match outcome {
        Ok(result) => state.tasks.mark_completed(&task_id, result).await,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "unit test generation failed");
            state.tasks.mark_failed(&task_id, e).await;
        }
    }
}

pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> AppResult<Json<crate::tasks::Task>> {
    state.tasks.get_task(&task_id).await.map(Json).ok_or(AppError::NotFound)
}

pub async fn list_tasks(State(state): State<AppState>, Query(query): Query<TaskListQuery>) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(state.config.default_task_list_limit);
    let tasks = state.tasks.list_tasks(query.status.as_deref(), limit).await;
    Json(serde_json::json!({ "total": tasks.len(), "tasks": tasks }))
}

pub async fn delete_task(State(state): State<AppState>, Path(task_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    if state.tasks.delete_task(&task_id).await {
        Ok(Json(serde_json::json!({ "message": format!("Task {task_id} deleted") })))
    } else {
        Err(AppError::NotFound)
    }
}

