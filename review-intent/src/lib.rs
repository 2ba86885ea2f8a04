//! Intent parser (C5): classifies a free-text user request into
//! review-only, review-and-tests, or tests-only, and extracts the file
//! targets a test-generation request names.
//!
//! Grounded on the Python `intent_parser.py`'s pattern tables and
//! first-match-wins decision order: tests-only patterns are checked
//! before review-only patterns, which are checked before the general
//! test-request patterns, with review-only as the default. Tests are
//! NEVER generated unless the text matches one of the explicit
//! patterns below — this is the safety invariant the whole module
//! exists to enforce.

use lazy_static::lazy_static;
use regex::Regex;
use review_types::{FileInfo, IntentKind, UserIntent};
use tracing::info;

lazy_static! {
    static ref TEST_REQUEST_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)generate\s+(unit\s+)?tests?",
        r"(?i)write\s+(unit\s+)?tests?",
        r"(?i)create\s+(unit\s+)?tests?",
        r"(?i)add\s+(unit\s+)?tests?",
        r"(?i)need\s+(unit\s+)?tests?",
        r"(?i)want\s+(unit\s+)?tests?",
        r"(?i)with\s+(unit\s+)?tests?",
        r"(?i)include\s+(unit\s+)?tests?",
        r"(?i)\btest\s+generation\b",
        r"(?i)\bunit\s+test\b",
    ]);
    static ref TEST_ONLY_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)^generate\s+(unit\s+)?tests?\s+(for|only)",
        r"(?i)^only\s+(generate|write|create)\s+tests?",
        r"(?i)^tests?\s+only",
        r"(?i)^just\s+(generate|write|create)\s+tests?",
    ]);
    static ref REVIEW_ONLY_PATTERNS: Vec<Regex> = compile(&[
        r"(?i)^review\s+only",
        r"(?i)^only\s+review",
        r"(?i)^just\s+review",
        r"(?i)^no\s+tests?",
        r"(?i)without\s+tests?",
        r"(?i)skip\s+tests?",
    ]);
    static ref TARGET_PATTERNS: Vec<Regex> = compile(&[
        r#"(?i)tests?\s+for\s+[`'"]?([^`'"]+)[`'"]?"#,
        r"(?i)test\s+([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)*)",
    ]);
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("static pattern is valid")).collect()
}

fn matches_any(text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

/// Parses free-text `user_request` plus the request's changed files into a
/// `UserIntent`. `files` is only used to fall back to "every changed file"
/// when a test-request doesn't name specific targets.
pub fn parse(user_request: &str, files: &[FileInfo]) -> UserIntent {
    if user_request.is_empty() {
        return UserIntent::review_only();
    }

    if matches_any(user_request, &TEST_ONLY_PATTERNS) {
        let test_targets = extract_targets(user_request, files);
        info!(?test_targets, "parsed intent: tests only");
        return UserIntent {
            kind: IntentKind::TestsOnly,
            test_targets,
        };
    }

    if matches_any(user_request, &REVIEW_ONLY_PATTERNS) {
        info!("parsed intent: review only (explicit)");
        return UserIntent::review_only();
    }

    if matches_any(user_request, &TEST_REQUEST_PATTERNS) {
        let test_targets = extract_targets(user_request, files);
        info!(?test_targets, "parsed intent: review and tests");
        return UserIntent {
            kind: IntentKind::ReviewAndTests,
            test_targets,
        };
    }

    info!("parsed intent: review only (default)");
    UserIntent::review_only()
}

fn extract_targets(user_request: &str, files: &[FileInfo]) -> Vec<String> {
    let mut targets = Vec::new();
    for pattern in TARGET_PATTERNS.iter() {
        for caps in pattern.captures_iter(user_request) {
            if let Some(m) = caps.get(1) {
                let value = m.as_str().to_string();
                if !value.is_empty() && !targets.contains(&value) {
                    targets.push(value);
                }
            }
        }
    }

    if targets.is_empty() && !files.is_empty() {
        targets = files
            .iter()
            .filter(|f| !f.is_deleted)
            .map(|f| f.path.clone())
            .collect();
    }

    targets
}

/// Enforces the "never auto-invoke" rule independent of the full parse:
/// a quick substring check usable anywhere a caller only needs to know
/// whether tests were explicitly requested at all.
pub fn should_generate_tests(user_request: Option<&str>) -> bool {
    let Some(text) = user_request else { return false };
    let lower = text.to_lowercase();
    const KEYWORDS: &[&str] = &[
        "generate test",
        "write test",
        "create test",
        "add test",
        "unit test",
        "test generation",
        "need test",
        "want test",
    ];
    KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileInfo {
        FileInfo::new(path.to_string())
    }

    #[test]
    fn empty_request_defaults_to_review_only() {
        let intent = parse("", &[]);
        assert_eq!(intent.kind, IntentKind::ReviewOnly);
        assert!(intent.should_review());
        assert!(!intent.should_generate_tests());
    }

    #[test]
    fn plain_text_defaults_to_review_only() {
        let intent = parse("please take a look at this", &[]);
        assert_eq!(intent.kind, IntentKind::ReviewOnly);
    }

    #[test]
    fn generate_tests_only_for_is_tests_only() {
        let intent = parse("generate tests only for auth.py", &[]);
        assert_eq!(intent.kind, IntentKind::TestsOnly);
        assert!(!intent.should_review());
        assert!(intent.test_targets.contains(&"auth.py".to_string()));
    }

    #[test]
    fn review_only_explicit_skips_tests_even_if_test_word_present() {
        // "review only" wins over the later mention of "tests" because
        // review-only patterns are checked before general test-request
        // patterns.
        let intent = parse("review only, ignore tests for now", &[]);
        assert_eq!(intent.kind, IntentKind::ReviewOnly);
        assert!(!intent.should_generate_tests());
    }

    #[test]
    fn combined_request_generates_tests_and_reviews() {
        let intent = parse("please review and also generate unit tests for parser.rs", &[]);
        assert_eq!(intent.kind, IntentKind::ReviewAndTests);
        assert!(intent.should_review());
        assert!(intent.should_generate_tests());
        assert!(intent.test_targets.contains(&"parser.rs".to_string()));
    }

    #[test]
    fn no_explicit_targets_falls_back_to_changed_files() {
        let files = vec![file("a.rs"), file("b.rs")];
        let intent = parse("please add unit tests", &files);
        assert_eq!(intent.kind, IntentKind::ReviewAndTests);
        assert_eq!(intent.test_targets, vec!["a.rs".to_string(), "b.rs".to_string()]);
    }

    #[test]
    fn deleted_files_are_excluded_from_fallback_targets() {
        let mut deleted = file("gone.rs");
        deleted.is_deleted = true;
        let files = vec![file("kept.rs"), deleted];
        let intent = parse("write unit tests", &files);
        assert_eq!(intent.test_targets, vec!["kept.rs".to_string()]);
    }

    #[test]
    fn should_generate_tests_requires_explicit_keyword() {
        assert!(should_generate_tests(Some("please add unit tests")));
        assert!(!should_generate_tests(Some("please review this")));
        assert!(!should_generate_tests(None));
    }
}
