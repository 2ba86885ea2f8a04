//! Result Aggregator (C7): merges `ParserOutput` and `ReviewOutput` into
//! one enriched `ReviewOutput` — enrichment, dedup, and optional
//! KB-filtering, in that order.
//!
//! Grounded on `result_aggregator.py`'s `ResultAggregator` (the
//! `_enrich_with_parser_data`/`_deduplicate_issues` pair) and
//! `kb_filter.py`'s `KBFilter` (the accept/reject/downgrade decision
//! procedure over past learnings). The aggregator never expands the issue
//! set — enrichment only adds what the review worker missed, dedup and
//! KB-filtering only remove or adjust what's already there.

use std::collections::HashSet;

use kb_client::KbContext;
use review_types::issue::{Category, ReviewIssue, Source};
use review_types::outputs::{HotspotLevel, ParserOutput, ReviewOutput};
use tracing::debug;

/// Adds parser hotspots not already covered by a review issue at the same
/// `(file, line)` as synthetic, low-confidence issues. Never removes
/// anything from `review_output.issues`.
pub fn enrich_with_hotspots(review_output: &mut ReviewOutput, parser_output: &ParserOutput) {
    let existing: HashSet<(String, u32)> = review_output
        .issues
        .iter()
        .map(|i| (i.file.clone(), i.line))
        .collect();

    for hotspot in &parser_output.hotspots {
        let key = (hotspot.file.clone(), hotspot.line);
        if existing.contains(&key) {
            continue;
        }
        let severity = match hotspot.level {
            HotspotLevel::Critical => review_types::issue::Severity::High,
            HotspotLevel::Warning => review_types::issue::Severity::Medium,
        };
        review_output.issues.push(ReviewIssue {
            file: hotspot.file.clone(),
            line: hotspot.line,
            end_line: None,
            severity,
            category: Category::Complexity,
            message: hotspot.reason.clone(),
            suggestion: Some("Consider refactoring to reduce complexity.".to_string()),
            suggested_code: None,
            confidence: 0.6,
            source: Source::Parser,
        });
    }
}

/// Collapses issues sharing `(file, line, normalized_message)`, retaining
/// the highest-severity variant and tagging the survivor `source = merged`.
/// Order-preserving: the first occurrence's position in the list is kept.
pub fn deduplicate(review_output: &mut ReviewOutput) {
    let mut kept: Vec<ReviewIssue> = Vec::with_capacity(review_output.issues.len());
    let mut index_of: std::collections::HashMap<(String, u32, String), usize> = std::collections::HashMap::new();

    for issue in review_output.issues.drain(..) {
        let key = (issue.file.clone(), issue.line, issue.normalized_message());
        match index_of.get(&key) {
            Some(&idx) => {
                let existing = &mut kept[idx];
                if issue.severity < existing.severity {
                    existing.severity = issue.severity;
                }
                existing.source = Source::Merged;
                debug!(file = %issue.file, line = issue.line, "collapsed duplicate issue");
            }
            None => {
                index_of.insert(key, kept.len());
                kept.push(issue);
            }
        }
    }

    review_output.issues = kept;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KbOutcome {
    Rejected,
    Downgraded,
    Unchanged,
}

/// Similarity threshold below which a KB match is ignored entirely — the
/// deliberately conservative rule: no filtering on
/// low-confidence matches.
const MIN_MATCH_CONFIDENCE: f64 = 0.7;

/// Filters issues against knowledge-base learnings. A learning marked
/// `rejected` that scores at least [`MIN_MATCH_CONFIDENCE`] and names the
/// issue's file drops the issue (`kb_rejected_precedent`); a matching
/// non-rejected (accepted) learning downgrades severity by one level.
/// Below-threshold matches never affect the issue.
pub fn kb_filter(mut issues: Vec<ReviewIssue>, kb: &KbContext) -> (Vec<ReviewIssue>, Vec<(ReviewIssue, KbOutcome)>) {
    if kb.is_empty() {
        return (issues, Vec::new());
    }

    let mut kept = Vec::with_capacity(issues.len());
    let mut changed = Vec::new();

    for mut issue in issues.drain(..) {
        let Some(best) = best_match(&issue, kb) else {
            kept.push(issue);
            continue;
        };
        let score = best.score.unwrap_or(0.0);
        if score < MIN_MATCH_CONFIDENCE {
            kept.push(issue);
            continue;
        }
        if best.rejected {
            changed.push((issue, KbOutcome::Rejected));
        } else {
            issue.severity = issue.severity.downgrade();
            changed.push((issue.clone(), KbOutcome::Downgraded));
            kept.push(issue);
        }
    }

    (kept, changed)
}

fn best_match<'a>(issue: &ReviewIssue, kb: &'a KbContext) -> Option<&'a kb_client::Learning> {
    let file_name = issue.file.rsplit('/').next().unwrap_or(&issue.file).to_lowercase();
    kb.learnings
        .iter()
        .filter(|l| {
            let text = l.learning.to_lowercase();
            text.contains(&file_name) || l.file.as_deref().is_some_and(|f| f == issue.file)
        })
        .max_by(|a, b| a.score.unwrap_or(0.0).partial_cmp(&b.score.unwrap_or(0.0)).unwrap())
}

/// Runs the full aggregation pipeline in spec order: enrich, then dedup,
/// then (optionally) KB-filter.
pub fn aggregate(mut review_output: ReviewOutput, parser_output: &ParserOutput, kb: Option<&KbContext>) -> ReviewOutput {
    enrich_with_hotspots(&mut review_output, parser_output);
    deduplicate(&mut review_output);
    if let Some(kb) = kb {
        let (kept, _dropped) = kb_filter(review_output.issues, kb);
        review_output.issues = kept;
    }
    review_output
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_types::outputs::Hotspot;

    fn issue(file: &str, line: u32, severity: review_types::issue::Severity, message: &str, source: Source) -> ReviewIssue {
        ReviewIssue {
            file: file.to_string(),
            line,
            end_line: None,
            severity,
            category: Category::Bug,
            message: message.to_string(),
            suggestion: None,
            suggested_code: None,
            confidence: 0.8,
            source,
        }
    }

    #[test]
    fn enrichment_adds_uncovered_hotspot_as_synthetic_issue() {
        let mut review = ReviewOutput::default();
        let mut parser = ParserOutput::default();
        parser.hotspots.push(Hotspot {
            file: "a.rs".into(),
            line: 10,
            level: HotspotLevel::Critical,
            reason: "too complex".into(),
        });
        enrich_with_hotspots(&mut review, &parser);
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].source, Source::Parser);
        assert_eq!(review.issues[0].severity, review_types::issue::Severity::High);
    }

    #[test]
    fn enrichment_skips_hotspot_already_covered_by_review() {
        let mut review = ReviewOutput::default();
        review.issues.push(issue("a.rs", 10, review_types::issue::Severity::Medium, "already flagged", Source::Review));
        let mut parser = ParserOutput::default();
        parser.hotspots.push(Hotspot {
            file: "a.rs".into(),
            line: 10,
            level: HotspotLevel::Warning,
            reason: "duplicate hotspot".into(),
        });
        enrich_with_hotspots(&mut review, &parser);
        assert_eq!(review.issues.len(), 1);
    }

    #[test]
    fn dedup_keeps_highest_severity_and_tags_merged() {
        let mut review = ReviewOutput::default();
        review.issues.push(issue("a.rs", 1, review_types::issue::Severity::Medium, "Same Issue", Source::Review));
        review.issues.push(issue("a.rs", 1, review_types::issue::Severity::High, "same issue", Source::Parser));
        deduplicate(&mut review);
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].severity, review_types::issue::Severity::High);
        assert_eq!(review.issues[0].source, Source::Merged);
    }

    #[test]
    fn dedup_never_expands_the_set() {
        let mut review = ReviewOutput::default();
        review.issues.push(issue("a.rs", 1, review_types::issue::Severity::Low, "one", Source::Review));
        review.issues.push(issue("b.rs", 2, review_types::issue::Severity::Low, "two", Source::Review));
        let before = review.issues.len();
        deduplicate(&mut review);
        assert_eq!(review.issues.len(), before);
    }

    #[test]
    fn kb_filter_drops_issue_matching_rejected_learning() {
        let issues = vec![issue("auth.rs", 5, review_types::issue::Severity::High, "missing null check", Source::Review)];
        let kb = KbContext {
            learnings: vec![kb_client::Learning {
                learning: "auth.rs null check suggestion was rejected by maintainer".into(),
                learnt_from: None,
                pr: None,
                file: Some("auth.rs".into()),
                score: Some(0.9),
                rejected: true,
            }],
        };
        let (kept, changed) = kb_filter(issues, &kb);
        assert!(kept.is_empty());
        assert_eq!(changed[0].1, KbOutcome::Rejected);
    }

    #[test]
    fn kb_filter_downgrades_on_accepted_precedent() {
        let issues = vec![issue("auth.rs", 5, review_types::issue::Severity::Critical, "weak hashing", Source::Review)];
        let kb = KbContext {
            learnings: vec![kb_client::Learning {
                learning: "auth.rs hashing concern was accepted and fixed previously".into(),
                learnt_from: None,
                pr: None,
                file: Some("auth.rs".into()),
                score: Some(0.9),
                rejected: false,
            }],
        };
        let (kept, _) = kb_filter(issues, &kb);
        assert_eq!(kept[0].severity, review_types::issue::Severity::High);
    }

    #[test]
    fn kb_filter_ignores_low_confidence_matches() {
        let issues = vec![issue("auth.rs", 5, review_types::issue::Severity::High, "x", Source::Review)];
        let kb = KbContext {
            learnings: vec![kb_client::Learning {
                learning: "auth.rs something unrelated".into(),
                learnt_from: None,
                pr: None,
                file: Some("auth.rs".into()),
                score: Some(0.2),
                rejected: true,
            }],
        };
        let (kept, changed) = kb_filter(issues, &kb);
        assert_eq!(kept.len(), 1);
        assert!(changed.is_empty());
    }

    #[test]
    fn empty_kb_context_is_a_no_op() {
        let issues = vec![issue("a.rs", 1, review_types::issue::Severity::Low, "x", Source::Review)];
        let (kept, changed) = kb_filter(issues.clone(), &KbContext::default());
        assert_eq!(kept.len(), issues.len());
        assert!(changed.is_empty());
    }
}
