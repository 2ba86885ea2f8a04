//! Classification of a free-text user request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIntent {
    pub kind: IntentKind,
    pub test_targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntentKind {
    ReviewOnly,
    ReviewAndTests,
    TestsOnly,
}

impl UserIntent {
    pub fn review_only() -> Self {
        Self {
            kind: IntentKind::ReviewOnly,
            test_targets: Vec::new(),
        }
    }

    /// `should_review`: `TESTS_ONLY` is the sole variant that skips review.
    pub fn should_review(&self) -> bool {
        !matches!(self.kind, IntentKind::TestsOnly)
    }

    /// `should_generate_tests`: every variant except `REVIEW_ONLY`.
    pub fn should_generate_tests(&self) -> bool {
        !matches!(self.kind, IntentKind::ReviewOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tests_only_implies_no_review() {
        let intent = UserIntent {
            kind: IntentKind::TestsOnly,
            test_targets: vec![],
        };
        assert!(!intent.should_review());
        assert!(intent.should_generate_tests());
    }

    #[test]
    fn review_only_implies_no_tests() {
        let intent = UserIntent::review_only();
        assert!(intent.should_review());
        assert!(!intent.should_generate_tests());
    }

    #[test]
    fn review_and_tests_implies_both() {
        let intent = UserIntent {
            kind: IntentKind::ReviewAndTests,
            test_targets: vec!["a.py".into()],
        };
        assert!(intent.should_review());
        assert!(intent.should_generate_tests());
    }
}
