//! Inbound HTTP surface: the axum router mounted at `/bot/*`, task lifecycle
//! bookkeeping, and the process entry point `start()` that `main.rs` drives.

pub mod config;
pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;
pub mod state;
pub mod tasks;

use std::time::Duration;

use axum::Router;
use axum::middleware;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use error_handler::AppError;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn build_router(state: state::AppState) -> Router {
    Router::new()
        .nest("/bot", routes::bot::router())
        .layer(middleware::from_fn(middleware_layer::json_extractor::json_error_mapper))
        .with_state(state)
}

/// Spawns the job-queue worker loop (`post_review` and any future job
/// types) as its own independent background task, same as each inbound
/// review itself.
fn spawn_queue_worker(queue: std::sync::Arc<review_queue::JobQueue>) {
    let stop = std::sync::Arc::new(tokio::sync::Notify::new());
    tokio::spawn(async move {
        queue.run_worker(Duration::from_secs(2), &stop).await;
    });
}

pub async fn start() -> Result<(), AppError> {
    init_tracing();

    let state = state::build_from_env().await?;
    spawn_queue_worker(state.queue.clone());

    let bind_addr = state.config.bind_addr.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr).await.map_err(AppError::Bind)?;
    info!(bind_addr, "api listening");

    axum::serve(listener, router).await.map_err(AppError::Server)?;
    Ok(())
}
