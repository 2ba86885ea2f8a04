//! The inbound request bundle and the files it carries.

use serde::{Deserialize, Serialize};

/// One file under review. Read-only once constructed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub content: Option<String>,
    pub diff: Option<String>,
    pub language: Option<String>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_modified: bool,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            diff: None,
            language: None,
            is_new: false,
            is_deleted: false,
            is_modified: true,
            start_line: None,
            end_line: None,
        }
    }
}

/// Immutable input bundle for one review. `session_id` uniquely identifies
/// this review across retries and restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub session_id: String,
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub branch: String,
    pub base_branch: String,
    pub head_owner: Option<String>,
    pub head_repo: Option<String>,
    pub files: Vec<FileInfo>,
    pub user_request: String,
    #[serde(default)]
    pub installation_id: Option<i64>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl ReviewRequest {
    /// True when the PR's head lives in a different repository than the base
    /// — requires the sandbox to clone the fork and add the base as a second
    /// remote rather than a single same-repo clone.
    pub fn is_fork(&self) -> bool {
        match (&self.head_owner, &self.head_repo) {
            (Some(ho), Some(hr)) => ho != &self.owner || hr != &self.repo,
            (Some(ho), None) => ho != &self.owner,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_fork_detects_mismatched_owner() {
        let mut req = sample_request();
        req.head_owner = Some("someone-else".to_string());
        req.head_repo = Some("repo".to_string());
        assert!(req.is_fork());
    }

    #[test]
    fn is_fork_false_when_head_matches_base() {
        let mut req = sample_request();
        req.head_owner = Some("acme".to_string());
        req.head_repo = Some("widgets".to_string());
        assert!(!req.is_fork());
    }

    #[test]
    fn is_fork_false_when_head_fields_absent() {
        let req = sample_request();
        assert!(!req.is_fork());
    }

    fn sample_request() -> ReviewRequest {
        ReviewRequest {
            session_id: "s1".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            pr_number: 1,
            branch: "feature".into(),
            base_branch: "main".into(),
            head_owner: None,
            head_repo: None,
            files: vec![],
            user_request: "review this".into(),
            installation_id: None,
            test_mode: false,
            dry_run: false,
        }
    }

    #[test]
    fn file_info_round_trips_through_json() {
        let f = FileInfo::new("a.py");
        let encoded = serde_json::to_string(&f).unwrap();
        let decoded: FileInfo = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.path, f.path);
        assert_eq!(decoded.is_modified, f.is_modified);
    }

    #[test]
    fn review_request_round_trips_through_json() {
        let req = sample_request();
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: ReviewRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.session_id, req.session_id);
        assert_eq!(decoded.pr_number, req.pr_number);
    }
}
