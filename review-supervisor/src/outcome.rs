//! The supervisor's terminal result — what `api` reports on the
//! task-status endpoint once a review finishes.

use review_types::formatted::{FormattedReview, FormattingStats};
use review_types::outputs::{ParserOutput, ReviewOutput, TestOutput};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewOutcome {
    pub status: Option<TaskStatus>,
    pub files_reviewed: usize,
    pub parser_output: Option<ParserOutput>,
    pub review_output: Option<ReviewOutput>,
    pub test_output: Option<TestOutput>,
    pub formatted_review: Option<FormattedReview>,
    pub formatting_stats: Option<FormattingStats>,
    pub error: Option<String>,
}

impl ReviewOutcome {
    pub fn is_completed(&self) -> &'static str {
        match self.status {
            Some(TaskStatus::Completed) => "completed",
            Some(TaskStatus::Failed) => "failed",
            None => "unknown",
        }
    }

    pub fn completed(files_reviewed: usize) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            files_reviewed,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
