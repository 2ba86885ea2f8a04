//! A single review finding and its closed-enum vocabulary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    // Ordered highest to lowest so derived `Ord` gives `Critical < Info`;
    // callers that want "worse than" compare with `<`.
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Lower is more severe; used as the sort key for priority ordering.
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn downgrade(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low => Severity::Info,
            Severity::Info => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Bug,
    Performance,
    Maintainability,
    Style,
    ErrorHandling,
    Documentation,
    Complexity,
    DeadCode,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Parser,
    Review,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub file: String,
    pub line: u32,
    pub end_line: Option<u32>,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub suggestion: Option<String>,
    pub suggested_code: Option<String>,
    pub confidence: f32,
    pub source: Source,
}

impl ReviewIssue {
    /// Lowercased, trimmed message — the normalization key used by the
    /// aggregator's `(file, line, normalized_message)` dedup rule.
    pub fn normalized_message(&self) -> String {
        self.message.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_priority_orders_critical_first() {
        assert!(Severity::Critical.priority() < Severity::High.priority());
        assert!(Severity::High.priority() < Severity::Medium.priority());
        assert!(Severity::Medium.priority() < Severity::Low.priority());
        assert!(Severity::Low.priority() < Severity::Info.priority());
    }

    #[test]
    fn severity_downgrade_ladder_terminates_at_info() {
        assert_eq!(Severity::Critical.downgrade(), Severity::High);
        assert_eq!(Severity::High.downgrade(), Severity::Medium);
        assert_eq!(Severity::Medium.downgrade(), Severity::Low);
        assert_eq!(Severity::Low.downgrade(), Severity::Info);
        assert_eq!(Severity::Info.downgrade(), Severity::Info);
    }

    #[test]
    fn normalized_message_trims_and_lowercases() {
        let issue = ReviewIssue {
            file: "a.py".into(),
            line: 1,
            end_line: None,
            severity: Severity::Low,
            category: Category::Style,
            message: "  Use Snake_Case  ".into(),
            suggestion: None,
            suggested_code: None,
            confidence: 0.5,
            source: Source::Review,
        };
        assert_eq!(issue.normalized_message(), "use snake_case");
    }
}
