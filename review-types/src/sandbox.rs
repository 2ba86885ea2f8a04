//! The sandbox session record owned by the Sandbox Manager (C3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Cloning,
    Ready,
    Error,
    Killed,
}

impl SandboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxStatus::Killed)
    }

    pub fn is_usable(self) -> bool {
        matches!(self, SandboxStatus::Running | SandboxStatus::Ready)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    pub session_id: String,
    pub status: SandboxStatus,
    pub repo_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl SandboxSession {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SandboxStatus::Creating,
            repo_path: None,
            created_at: now,
            last_activity: now,
            error_message: None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}
