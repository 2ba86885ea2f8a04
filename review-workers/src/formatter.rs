//! CommentFormatter Worker: turns raw review issues into what actually
//! gets posted.
//!
//! Grounded on `comment_formatter_agent.py`'s `CommentFormatterAgent`:
//! same two-phase pipeline (pre-filter to valid diff lines, then either an
//! LLM formatting pass or the deterministic fallback), same merge-by-line
//! rule, same severity/category emoji summary. The
//! deterministic path is "fully equivalent," not merely a fallback of last
//! resort, so this worker runs it whenever no `LlmClient` is supplied or
//! the LLM call/parse fails.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{instrument, warn};

use llm_client::LlmClient;
use review_types::formatted::{DropReason, DroppedComment, FormattedInlineComment, FormattedReview};
use review_types::issue::{Category, ReviewIssue, Severity};

const DEFAULT_MAX_COMMENTS: usize = 20;

fn severity_emoji(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "🛑",
        Severity::High => "🔴",
        Severity::Medium => "🟠",
        Severity::Low => "🟡",
        Severity::Info => "💬",
    }
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
        Severity::Info => "Info",
    }
}

fn category_emoji(c: Category) -> &'static str {
    match c {
        Category::Security => "🔒",
        Category::Bug => "🐛",
        Category::Performance => "⚡",
        Category::Maintainability => "🧹",
        Category::Style => "🎨",
        Category::ErrorHandling => "⚠️",
        Category::Documentation => "📝",
        Category::Complexity => "🧩",
        Category::DeadCode => "🪦",
        Category::Other => "💬",
    }
}

fn category_name(c: Category) -> &'static str {
    match c {
        Category::Security => "Security",
        Category::Bug => "Bug",
        Category::Performance => "Performance",
        Category::Maintainability => "Maintainability",
        Category::Style => "Style",
        Category::ErrorHandling => "Error Handling",
        Category::Documentation => "Documentation",
        Category::Complexity => "Complexity",
        Category::DeadCode => "Dead Code",
        Category::Other => "Other",
    }
}

/// `ValidLines` as the formatter sees it: a file that is absent from the
/// map is "not in the diff at all," distinct from a file present with an
/// empty line set.
pub type ValidLines = HashMap<String, std::collections::HashSet<u32>>;

const SYSTEM_PROMPT_TEMPLATE: &str = "You format code review issues into a PR-ready summary and \
inline comments. Respond with JSON: {{\"summary_body\": string, \"inline_comments\": \
[{{\"path\", \"line\", \"start_line\" (nullable), \"body\", \"severity\"}}]}}. Merge issues that \
share the same file and line into one comment. Never include more than {max_comments} inline \
comments.";

#[derive(Debug, Deserialize)]
struct RawFormatterResponse {
    summary_body: String,
    #[serde(default)]
    inline_comments: Vec<RawInlineComment>,
}

#[derive(Debug, Deserialize)]
struct RawInlineComment {
    path: String,
    line: u32,
    #[serde(default)]
    start_line: Option<u32>,
    body: String,
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

/// Runs the formatter. `llm` is optional: pass `None` to always use the
/// deterministic path (treated as fully equivalent to an LLM pass, not a
/// degraded mode).
#[instrument(skip(llm, issues, valid_lines, diff_text_per_file), fields(raw = issues.len()))]
pub async fn format_review(
    llm: Option<&LlmClient>,
    issues: &[ReviewIssue],
    valid_lines: &ValidLines,
    diff_text_per_file: &HashMap<String, String>,
    max_comments: usize,
) -> FormattedReview {
    let max_comments = if max_comments == 0 { DEFAULT_MAX_COMMENTS } else { max_comments };
    let (valid, mut dropped) = partition_by_diff(issues, valid_lines);

    if valid.is_empty() {
        return FormattedReview::no_issues_on_changed_lines(dropped.len());
    }

    if let Some(llm) = llm {
        match try_llm_format(llm, &valid, diff_text_per_file, max_comments).await {
            Some(mut review) => {
                review.dropped.splice(0..0, dropped);
                return review;
            }
            None => warn!("LLM formatting failed or was unparseable, falling back to deterministic formatting"),
        }
    }

    let mut review = deterministic_format(&valid, max_comments);
    dropped.append(&mut review.dropped);
    review.dropped = dropped;
    review
}

fn partition_by_diff<'a>(
    issues: &'a [ReviewIssue],
    valid_lines: &ValidLines,
) -> (Vec<&'a ReviewIssue>, Vec<DroppedComment>) {
    let mut valid = Vec::new();
    let mut dropped = Vec::new();

    for issue in issues {
        match valid_lines.get(&issue.file) {
            None => dropped.push(DroppedComment {
                file: issue.file.clone(),
                line: issue.line,
                reason: DropReason::FileNotInDiff,
            }),
            Some(lines) if !lines.contains(&issue.line) => dropped.push(DroppedComment {
                file: issue.file.clone(),
                line: issue.line,
                reason: DropReason::NotInDiff,
            }),
            Some(_) => valid.push(issue),
        }
    }

    (valid, dropped)
}

async fn try_llm_format(
    llm: &LlmClient,
    valid: &[&ReviewIssue],
    diff_text_per_file: &HashMap<String, String>,
    max_comments: usize,
) -> Option<FormattedReview> {
    let prompt = build_llm_prompt(valid, diff_text_per_file);
    let system_prompt = SYSTEM_PROMPT_TEMPLATE.replace("{max_comments}", &max_comments.to_string());
    let response = llm.invoke(&prompt, Some(&system_prompt)).await.ok()?;
    let parsed = parse_llm_response(&response)?;

    let mut inline_comments: Vec<FormattedInlineComment> = parsed
        .inline_comments
        .into_iter()
        .map(|c| FormattedInlineComment {
            path: c.path,
            line: c.line,
            start_line: c.start_line,
            body: c.body,
            severity: parse_severity(&c.severity),
        })
        .collect();

    let mut dropped = Vec::new();
    if inline_comments.len() > max_comments {
        inline_comments.sort_by_key(|c| c.severity.priority());
        let overflow = inline_comments.split_off(max_comments);
        dropped.extend(overflow.into_iter().map(|c| DroppedComment {
            file: c.path,
            line: c.line,
            reason: DropReason::LimitExceeded,
        }));
    }

    Some(FormattedReview {
        summary_body: parsed.summary_body,
        inline_comments,
        dropped,
    })
}

fn build_llm_prompt(valid: &[&ReviewIssue], diff_text_per_file: &HashMap<String, String>) -> String {
    let mut out = String::from("## Issues to format\n\n");
    for issue in valid {
        out.push_str(&format!(
            "- {}:{} [{:?}/{:?}] {}\n",
            issue.file, issue.line, issue.severity, issue.category, issue.message
        ));
    }
    out.push_str("\n## Diff context\n");
    let mut budget = 8000usize;
    for (file, diff) in diff_text_per_file {
        if budget == 0 {
            break;
        }
        let take = diff.len().min(budget);
        out.push_str(&format!("\n### {file}\n```diff\n{}\n```\n", &diff[..take]));
        budget = budget.saturating_sub(take);
    }
    out
}

fn parse_llm_response(response: &str) -> Option<RawFormatterResponse> {
    let json_str = extract_json_block(response);
    serde_json::from_str(json_str)
        .inspect_err(|e| warn!(error = %e, "failed to parse comment formatter LLM response"))
        .ok()
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

/// One group of raw issues sharing `(file, line)` — the merge unit.
struct Group<'a> {
    file: String,
    line: u32,
    issues: Vec<&'a ReviewIssue>,
}

impl Group<'_> {
    fn max_severity(&self) -> Severity {
        self.issues.iter().map(|i| i.severity).min().unwrap_or(Severity::Info)
    }

    fn max_end_line(&self) -> Option<u32> {
        self.issues
            .iter()
            .filter_map(|i| i.end_line)
            .filter(|end| *end > self.line)
            .max()
    }
}

fn deterministic_format(valid: &[&ReviewIssue], max_comments: usize) -> FormattedReview {
    let mut by_key: HashMap<(String, u32), Vec<&ReviewIssue>> = HashMap::new();
    let mut order: Vec<(String, u32)> = Vec::new();
    for issue in valid {
        let key = (issue.file.clone(), issue.line);
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.entry(key).or_default().push(issue);
    }

    let mut groups: Vec<Group> = order
        .into_iter()
        .map(|(file, line)| {
            let issues = by_key.remove(&(file.clone(), line)).unwrap();
            Group { file, line, issues }
        })
        .collect();

    // Sort by highest-priority issue in the group, tie-break (file, line)
    // ascending for deterministic output (an otherwise unresolved tie-break).
    groups.sort_by(|a, b| {
        a.max_severity()
            .priority()
            .cmp(&b.max_severity().priority())
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });

    let overflow_start = groups.len().min(max_comments);
    let dropped_groups = groups.split_off(overflow_start);

    let inline_comments: Vec<FormattedInlineComment> = groups.iter().map(render_group).collect();

    let dropped: Vec<DroppedComment> = dropped_groups
        .iter()
        .map(|g| DroppedComment {
            file: g.file.clone(),
            line: g.line,
            reason: DropReason::LimitExceeded,
        })
        .collect();

    let summary_body = build_summary(valid, &inline_comments, &dropped);

    FormattedReview { summary_body, inline_comments, dropped }
}

fn render_group(group: &Group) -> FormattedInlineComment {
    let severity = group.max_severity();
    let body = if group.issues.len() > 1 {
        render_merged(group)
    } else {
        render_single(group.issues[0])
    };
    // A distinct `end_line` promotes to a multi-line comment: the anchor
    // line becomes `end_line`, `start_line` carries the range's start.
    let (line, start_line) = match group.max_end_line() {
        Some(end) => (end, Some(group.line)),
        None => (group.line, None),
    };
    FormattedInlineComment {
        path: group.file.clone(),
        line,
        start_line,
        body,
        severity,
    }
}

fn render_single(issue: &ReviewIssue) -> String {
    let mut body = format!(
        "**{} {}** | {} {}\n\n{}",
        severity_emoji(issue.severity),
        severity_label(issue.severity),
        category_emoji(issue.category),
        category_name(issue.category),
        issue.message
    );
    append_suggestion(&mut body, issue);
    body
}

/// Semantic concatenation, not textual overwrite: each merged issue gets
/// its own collapsible section so none of the original findings are lost.
fn render_merged(group: &Group) -> String {
    let mut body = format!("**{} merged findings** ({} issues on this line)\n", severity_emoji(group.max_severity()), group.issues.len());
    for issue in &group.issues {
        body.push_str(&format!(
            "\n<details>\n<summary>{} {} | {} {}</summary>\n\n{}",
            severity_emoji(issue.severity),
            severity_label(issue.severity),
            category_emoji(issue.category),
            category_name(issue.category),
            issue.message
        ));
        append_suggestion(&mut body, issue);
        body.push_str("\n</details>\n");
    }
    body
}

fn append_suggestion(body: &mut String, issue: &ReviewIssue) {
    if let Some(code) = &issue.suggested_code {
        body.push_str(&format!("\n\n<details>\n<summary>Suggested Fix</summary>\n\n```suggestion\n{code}\n```\n\n</details>"));
    } else if let Some(suggestion) = &issue.suggestion {
        body.push_str(&format!("\n\n**Suggestion:** {suggestion}"));
    }
}

fn build_summary(valid: &[&ReviewIssue], inline_comments: &[FormattedInlineComment], dropped: &[DroppedComment]) -> String {
    let mut severity_counts: HashMap<Severity, usize> = HashMap::new();
    let mut category_counts: HashMap<Category, usize> = HashMap::new();
    for issue in valid {
        *severity_counts.entry(issue.severity).or_default() += 1;
        *category_counts.entry(issue.category).or_default() += 1;
    }

    let mut parts = vec![
        "## Code Review Summary".to_string(),
        String::new(),
        "### Issue Breakdown".to_string(),
    ];
    for sev in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low, Severity::Info] {
        if let Some(count) = severity_counts.get(&sev) {
            parts.push(format!("- {} **{}**: {count}", severity_emoji(sev), severity_label(sev)));
        }
    }
    parts.push(String::new());

    let mut cats: Vec<(&Category, &usize)> = category_counts.iter().collect();
    cats.sort_by(|a, b| b.1.cmp(a.1));
    if !cats.is_empty() {
        parts.push("### Categories".to_string());
        for (cat, count) in cats.into_iter().take(5) {
            parts.push(format!("- {} {}: {count}", category_emoji(*cat), category_name(*cat)));
        }
        parts.push(String::new());
    }

    parts.push("---".to_string());
    parts.push(format!("*Found {} issue(s) on changed lines. Posting {} inline comment(s).*", valid.len(), inline_comments.len()));

    let limit_dropped = dropped.iter().filter(|d| matches!(d.reason, DropReason::LimitExceeded)).count();
    if limit_dropped > 0 {
        parts.push(format!("*{limit_dropped} issue(s) exceeded the inline comment limit and were summarized only here.*"));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_types::issue::Source;
    use std::collections::HashSet;

    fn issue(file: &str, line: u32, severity: Severity, category: Category, message: &str) -> ReviewIssue {
        ReviewIssue {
            file: file.to_string(),
            line,
            end_line: None,
            severity,
            category,
            message: message.to_string(),
            suggestion: None,
            suggested_code: None,
            confidence: 0.9,
            source: Source::Review,
        }
    }

    fn valid_lines(pairs: &[(&str, &[u32])]) -> ValidLines {
        pairs
            .iter()
            .map(|(f, lines)| (f.to_string(), lines.iter().copied().collect::<HashSet<_>>()))
            .collect()
    }

    // S1: one issue on a changed line.
    #[tokio::test]
    async fn single_issue_on_changed_line_is_posted() {
        let issues = vec![issue("a.py", 1, Severity::High, Category::Bug, "bug here")];
        let vl = valid_lines(&[("a.py", &[1])]);
        let review = format_review(None, &issues, &vl, &HashMap::new(), 20).await;
        assert_eq!(review.inline_comments.len(), 1);
        assert!(review.dropped.is_empty());
        assert!(review.summary_body.contains("High"));
    }

    // S2: issue on unchanged line.
    #[tokio::test]
    async fn issue_outside_diff_is_dropped_not_posted() {
        let issues = vec![issue("a.py", 5, Severity::Medium, Category::Style, "nit")];
        let vl = valid_lines(&[("a.py", &[1])]);
        let review = format_review(None, &issues, &vl, &HashMap::new(), 20).await;
        assert!(review.inline_comments.is_empty());
        assert_eq!(review.dropped.len(), 1);
        assert_eq!(review.dropped[0].reason, DropReason::NotInDiff);
        assert!(review.summary_body.contains("No issues found"));
    }

    #[tokio::test]
    async fn file_absent_from_valid_lines_is_file_not_in_diff() {
        let issues = vec![issue("untouched.py", 1, Severity::Low, Category::Style, "nit")];
        let review = format_review(None, &issues, &ValidLines::new(), &HashMap::new(), 20).await;
        assert_eq!(review.dropped[0].reason, DropReason::FileNotInDiff);
    }

    // S3: two issues same line merge into one comment at max severity.
    #[tokio::test]
    async fn same_line_issues_merge_into_one_comment_at_max_severity() {
        let issues = vec![
            issue("a.py", 10, Severity::Medium, Category::Style, "style nit"),
            issue("a.py", 10, Severity::High, Category::Bug, "actual bug"),
        ];
        let vl = valid_lines(&[("a.py", &[10])]);
        let review = format_review(None, &issues, &vl, &HashMap::new(), 20).await;
        assert_eq!(review.inline_comments.len(), 1);
        assert_eq!(review.inline_comments[0].severity, Severity::High);
        assert!(review.inline_comments[0].body.contains("style nit"));
        assert!(review.inline_comments[0].body.contains("actual bug"));
    }

    // S4: limit enforcement, 21 issues distinct lines, cap 20.
    #[tokio::test]
    async fn exceeding_max_comments_drops_the_overflow() {
        let mut issues = Vec::new();
        let mut lines = Vec::new();
        for line in 1..=21u32 {
            issues.push(issue("a.py", line, Severity::Medium, Category::Style, "same severity"));
            lines.push(line);
        }
        let vl = valid_lines(&[("a.py", &lines)]);
        let review = format_review(None, &issues, &vl, &HashMap::new(), 20).await;
        assert_eq!(review.inline_comments.len(), 20);
        assert_eq!(review.dropped.len(), 1);
        assert_eq!(review.dropped[0].reason, DropReason::LimitExceeded);
    }

    #[tokio::test]
    async fn exactly_max_comments_drops_nothing() {
        let mut issues = Vec::new();
        let mut lines = Vec::new();
        for line in 1..=20u32 {
            issues.push(issue("a.py", line, Severity::Low, Category::Style, "x"));
            lines.push(line);
        }
        let vl = valid_lines(&[("a.py", &lines)]);
        let review = format_review(None, &issues, &vl, &HashMap::new(), 20).await;
        assert_eq!(review.inline_comments.len(), 20);
        assert!(review.dropped.is_empty());
    }

    #[tokio::test]
    async fn distinct_end_line_promotes_to_multiline_comment() {
        let mut multi = issue("a.py", 3, Severity::High, Category::Bug, "range issue");
        multi.end_line = Some(6);
        let vl = valid_lines(&[("a.py", &[3])]);
        let review = format_review(None, &[multi], &vl, &HashMap::new(), 20).await;
        assert_eq!(review.inline_comments[0].start_line, Some(3));
        assert_eq!(review.inline_comments[0].line, 6);
    }

    #[tokio::test]
    async fn empty_issue_list_uses_no_issues_summary() {
        let review = format_review(None, &[], &ValidLines::new(), &HashMap::new(), 20).await;
        assert!(review.inline_comments.is_empty());
        assert_eq!(review.summary_body, "No issues found on changed lines.");
    }
}
