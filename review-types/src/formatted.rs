//! The formatter's output: what actually gets posted to the PR.

use serde::{Deserialize, Serialize};

use crate::issue::Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NotInDiff,
    FileNotInDiff,
    Merged,
    LimitExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedComment {
    pub file: String,
    pub line: u32,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedInlineComment {
    pub path: String,
    pub line: u32,
    pub start_line: Option<u32>,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedReview {
    pub summary_body: String,
    pub inline_comments: Vec<FormattedInlineComment>,
    pub dropped: Vec<DroppedComment>,
}

/// Stats surfaced on the task-status endpoint per spec's error-handling
/// section: counts of what happened on the way from raw issues to posted
/// comments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct FormattingStats {
    pub total_raw_comments: usize,
    pub comments_on_valid_lines: usize,
    pub inline_comments_posted: usize,
    pub comments_dropped: usize,
}

impl FormattedReview {
    pub fn no_issues_on_changed_lines(out_of_diff_count: usize) -> Self {
        let summary_body = if out_of_diff_count > 0 {
            format!(
                "No issues found on changed lines. {out_of_diff_count} issue(s) were reported \
                 outside the diff and were not posted."
            )
        } else {
            "No issues found on changed lines.".to_string()
        };
        Self {
            summary_body,
            inline_comments: Vec::new(),
            dropped: Vec::new(),
        }
    }

    pub fn stats(&self, total_raw: usize) -> FormattingStats {
        FormattingStats {
            total_raw_comments: total_raw,
            comments_on_valid_lines: total_raw - self.not_in_diff_count(),
            inline_comments_posted: self.inline_comments.len(),
            comments_dropped: self.dropped.len(),
        }
    }

    fn not_in_diff_count(&self) -> usize {
        self.dropped
            .iter()
            .filter(|d| matches!(d.reason, DropReason::NotInDiff | DropReason::FileNotInDiff))
            .count()
    }
}
