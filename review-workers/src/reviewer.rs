//! Review Worker: LLM-backed code review over changed files.
//!
//! Grounded on `review_agent.py`'s prompt/response contract — a JSON array of
//! review comments, optionally fenced in a ```json code block — reusing
//! `mr-reviewer::review::policy`'s `strip_think` idiom for stripping
//! reasoning-model scratch blocks before parsing.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{instrument, warn};

use kb_client::KbContext;
use llm_client::LlmClient;
use review_types::issue::{Category, ReviewIssue, Severity, Source};
use review_types::outputs::{ParserOutput, ReviewOutput};
use review_types::request::{FileInfo, ReviewRequest};

const SYSTEM_PROMPT: &str = "You are an expert code reviewer. Identify bugs, security issues, \
performance problems, and maintainability concerns in the changed files below. Be specific and \
reference exact line numbers. Only flag real issues, not stylistic nitpicks, unless they harm \
readability. Respond with a JSON array of review comments; each item has file_path, line_start, \
line_end (nullable), severity (critical|high|medium|low|info), category \
(security|bug|performance|maintainability|style|error_handling|documentation|complexity|other), \
message, suggestion (nullable), suggested_code (nullable), and confidence (0.0-1.0). If there are \
no issues, return an empty array.";

lazy_static! {
    static ref THINK_BLOCK: Regex = Regex::new(r"(?s)<think>.*?</think>").unwrap();
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    file_path: String,
    line_start: u32,
    #[serde(default)]
    line_end: Option<u32>,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    suggested_code: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_severity() -> String {
    "medium".to_string()
}
fn default_category() -> String {
    "other".to_string()
}
fn default_confidence() -> f32 {
    0.8
}

/// Issues below this confidence are dropped entirely rather than surfaced —
/// The minimum-confidence gate below which a finding is dropped. Configurable via
/// `REVIEW_MIN_CONFIDENCE` since the right cutoff is a deployment tuning
/// knob, not a constant either source hardcodes.
fn min_confidence() -> f32 {
    std::env::var("REVIEW_MIN_CONFIDENCE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.3)
}

/// Runs the LLM review pass. Never fails the caller's stage: a transport or
/// parse failure is logged and surfaced as an empty `ReviewOutput` so the
/// supervisor can continue to the formatter with whatever the parser found.
#[instrument(skip(llm, request, parser_output, kb_context), fields(session = %request.session_id))]
pub async fn review(
    llm: &LlmClient,
    request: &ReviewRequest,
    parser_output: &ParserOutput,
    kb_context: &KbContext,
) -> ReviewOutput {
    let changed: Vec<&FileInfo> = request.files.iter().filter(|f| !f.is_deleted).collect();
    if changed.is_empty() {
        return ReviewOutput::default();
    }

    let prompt = build_prompt(request, &changed, parser_output, kb_context);
    let response = match llm.invoke(&prompt, Some(SYSTEM_PROMPT)).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "review LLM call failed");
            return ReviewOutput::default();
        }
    };

    let min_confidence = min_confidence();
    let issues = parse_response(&response)
        .into_iter()
        .filter(|issue| {
            if issue.confidence < min_confidence {
                warn!(file = %issue.file, line = issue.line, confidence = issue.confidence, "dropping issue below minimum confidence");
                false
            } else {
                true
            }
        })
        .collect();
    ReviewOutput { issues }
}

fn build_prompt(
    request: &ReviewRequest,
    files: &[&FileInfo],
    parser_output: &ParserOutput,
    kb_context: &KbContext,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "## Pull Request Context\n**Repository:** {}/{}\n**PR #{}**\n**Request:** {}\n\n",
        request.owner, request.repo, request.pr_number, request.user_request
    ));

    if !kb_context.learnings.is_empty() {
        out.push_str(&kb_client::KbClient::format_for_prompt(kb_context, 5));
        out.push('\n');
    }

    if !parser_output.hotspots.is_empty() {
        out.push_str("## Static Analysis Hotspots\n");
        for h in parser_output.hotspots.iter().take(20) {
            out.push_str(&format!("- {}:{} ({:?}) {}\n", h.file, h.line, h.level, h.reason));
        }
        out.push('\n');
    }

    out.push_str("## Files to Review\n\n");
    for f in files {
        out.push_str(&format!("### File: {}\n", f.path));
        if let Some(lang) = &f.language {
            out.push_str(&format!("Language: {lang}\n"));
        }
        if let Some(diff) = &f.diff {
            out.push_str("```diff\n");
            out.push_str(diff);
            out.push_str("\n```\n\n");
        } else if let Some(content) = &f.content {
            out.push_str("```\n");
            out.push_str(content);
            out.push_str("\n```\n\n");
        }
    }

    out
}

fn parse_response(response: &str) -> Vec<ReviewIssue> {
    let cleaned = THINK_BLOCK.replace_all(response, "");
    let json_str = extract_json_block(&cleaned);

    let raw: Vec<RawIssue> = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse review response as JSON");
            return Vec::new();
        }
    };

    raw.into_iter().map(to_review_issue).collect()
}

fn extract_json_block(s: &str) -> &str {
    if let Some(start) = s.find("```json") {
        let after = &s[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    s.trim()
}

fn to_review_issue(raw: RawIssue) -> ReviewIssue {
    ReviewIssue {
        file: raw.file_path,
        line: raw.line_start,
        end_line: raw.line_end,
        severity: parse_severity(&raw.severity),
        category: parse_category(&raw.category),
        message: raw.message,
        suggestion: raw.suggestion,
        suggested_code: raw.suggested_code,
        confidence: raw.confidence.clamp(0.0, 1.0),
        source: Source::Review,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        "low" => Severity::Low,
        "info" => Severity::Info,
        _ => Severity::Medium,
    }
}

fn parse_category(s: &str) -> Category {
    match s.to_lowercase().as_str() {
        "security" => Category::Security,
        "bug" => Category::Bug,
        "performance" => Category::Performance,
        "maintainability" => Category::Maintainability,
        "style" => Category::Style,
        "error_handling" => Category::ErrorHandling,
        "documentation" => Category::Documentation,
        "complexity" => Category::Complexity,
        "dead_code" => Category::DeadCode,
        _ => Category::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Here is my review:\n```json\n[{\"a\":1}]\n```\nThanks.";
        assert_eq!(extract_json_block(text), "[{\"a\":1}]");
    }

    #[test]
    fn parses_well_formed_issue_array() {
        let text = r#"[
            {"file_path": "a.rs", "line_start": 10, "severity": "high", "category": "security",
             "message": "unsanitized input", "confidence": 0.9}
        ]"#;
        let issues = parse_response(text);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file, "a.rs");
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].category, Category::Security);
        assert_eq!(issues[0].source, Source::Review);
    }

    #[test]
    fn malformed_json_yields_no_issues_rather_than_panicking() {
        assert!(parse_response("not json at all").is_empty());
    }

    #[test]
    fn strips_think_blocks_before_parsing() {
        let text = "<think>scratch reasoning</think>[{\"file_path\":\"a.rs\",\"line_start\":1,\"confidence\":0.5}]";
        let issues = parse_response(text);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn empty_array_response_yields_no_issues() {
        assert!(parse_response("[]").is_empty());
    }

    #[test]
    fn default_min_confidence_is_point_three() {
        assert!((min_confidence() - 0.3).abs() < f32::EPSILON);
    }
}
