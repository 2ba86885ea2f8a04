//! Per-session append-only stage log (C4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    IntentParsing,
    SandboxSetup,
    Parsing,
    Review,
    Tests,
    Aggregation,
    Formatting,
    Posting,
}

impl Step {
    /// Fixed stage order.
    pub const ORDER: [Step; 8] = [
        Step::IntentParsing,
        Step::SandboxSetup,
        Step::Parsing,
        Step::Review,
        Step::Tests,
        Step::Aggregation,
        Step::Formatting,
        Step::Posting,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).expect("Step::ORDER is exhaustive")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub current_step: Step,
    pub completed_steps: Vec<Step>,
    pub snapshots: Snapshots,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Snapshotted outputs of each completed step. Stored as `Value` so the
/// checkpoint store never depends on the concrete worker-output types,
/// matching the "snapshots store the public data model only" design note.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshots {
    pub intent: Option<Value>,
    pub kb_context: Option<Value>,
    pub parser_output: Option<Value>,
    pub review_output: Option<Value>,
    pub test_output: Option<Value>,
}

impl Checkpoint {
    pub fn new(checkpoint_id: impl Into<String>, session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            session_id: session_id.into(),
            created_at: now,
            current_step: Step::IntentParsing,
            completed_steps: Vec::new(),
            snapshots: Snapshots::default(),
            last_error: None,
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn is_step_complete(&self, step: Step) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Idempotent: marking an already-complete step is a no-op, preserving
    /// the "completed_steps is strictly extending" invariant.
    pub fn mark_step_complete(&mut self, step: Step) {
        if !self.is_step_complete(step) {
            self.completed_steps.push(step);
        }
        if let Some(next) = Step::ORDER.get(step.index() + 1) {
            self.current_step = *next;
        }
    }

    /// The first step (in fixed order) not yet complete — the resume point
    /// after a restart.
    pub fn resume_point(&self) -> Step {
        Step::ORDER
            .into_iter()
            .find(|s| !self.is_step_complete(*s))
            .unwrap_or(Step::Posting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn mark_step_complete_is_idempotent() {
        let mut cp = Checkpoint::new("c1", "s1", now());
        cp.mark_step_complete(Step::IntentParsing);
        cp.mark_step_complete(Step::IntentParsing);
        assert_eq!(cp.completed_steps, vec![Step::IntentParsing]);
    }

    #[test]
    fn completed_steps_never_shrinks() {
        let mut cp = Checkpoint::new("c1", "s1", now());
        cp.mark_step_complete(Step::IntentParsing);
        cp.mark_step_complete(Step::SandboxSetup);
        assert_eq!(cp.completed_steps.len(), 2);
        assert!(cp.is_step_complete(Step::IntentParsing));
        assert!(cp.is_step_complete(Step::SandboxSetup));
    }

    #[test]
    fn resume_point_is_first_incomplete_step() {
        let mut cp = Checkpoint::new("c1", "s1", now());
        assert_eq!(cp.resume_point(), Step::IntentParsing);
        cp.mark_step_complete(Step::IntentParsing);
        assert_eq!(cp.resume_point(), Step::SandboxSetup);
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let cp = Checkpoint::new("c1", "s1", now());
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.checkpoint_id, cp.checkpoint_id);
        assert_eq!(decoded.current_step, cp.current_step);
    }
}
