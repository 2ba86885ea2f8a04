mod dto;
mod handlers;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/review", post(handlers::trigger_review))
        .route("/create-unit-tests", post(handlers::create_unit_tests))
        .route("/generate-pr-tests", post(handlers::generate_pr_tests))
        .route("/task-status/{task_id}", get(handlers::task_status))
        .route("/tasks", get(handlers::list_tasks))
        .route("/task/{task_id}", delete(handlers::delete_task))
}
