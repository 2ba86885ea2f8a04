use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::http::response_envelope::ApiResponse;

/// Public application error type. Sandbox/queue/checkpoint failures from
/// collaborator crates fold into `Http` with their own status/code, so
/// handlers can just use `?` instead of hand-rolling a match at each call
/// site.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    #[error("not found")]
    NotFound,

    /// Rich HTTP error mapped from lower layers with specific status & code.
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl AppError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Http { status, .. } => *status,
            AppError::Bind(_) | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Bind(_) => "BIND_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
            AppError::NotFound => "NOT_FOUND",
            AppError::Http { code, .. } => code,
        }
    }

    /// Which collaborator subsystem raised this error, when it came from one.
    /// Derived from the `Http` variant's code prefix rather than adding a
    /// sixth enum variant per subsystem.
    pub(crate) fn stage(&self) -> Option<&'static str> {
        match self {
            AppError::Http { code, .. } if code.starts_with("SANDBOX") => Some("sandbox"),
            AppError::Http { code, .. } if code.starts_with("JOB") => Some("queue"),
            AppError::Http { code, .. } if code.starts_with("CHECKPOINT") => Some("checkpoint"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, envelope) = ApiResponse::<()>::from_app_error(&self);
        envelope.into_response_with_status(status)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// `SandboxCreationError` / `SandboxOperationError` / `SandboxNotFoundError`.
impl From<review_sandbox::Error> for AppError {
    fn from(err: review_sandbox::Error) -> Self {
        match err {
            review_sandbox::Error::Creation(msg) => AppError::Http {
                status: StatusCode::BAD_GATEWAY,
                code: "SANDBOX_CREATION_ERROR",
                message: msg,
            },
            review_sandbox::Error::NotFound(msg) => AppError::Http {
                status: StatusCode::NOT_FOUND,
                code: "SANDBOX_NOT_FOUND",
                message: msg,
            },
            review_sandbox::Error::Operation(msg) | review_sandbox::Error::Terminal(msg) => AppError::Http {
                status: StatusCode::BAD_GATEWAY,
                code: "SANDBOX_OPERATION_ERROR",
                message: msg,
            },
        }
    }
}

/// `JobHandlerError`.
impl From<review_queue::Error> for AppError {
    fn from(err: review_queue::Error) -> Self {
        AppError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "JOB_HANDLER_ERROR",
            message: err.to_string(),
        }
    }
}

impl From<review_checkpoint::Error> for AppError {
    fn from(err: review_checkpoint::Error) -> Self {
        AppError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "CHECKPOINT_ERROR",
            message: err.to_string(),
        }
    }
}
