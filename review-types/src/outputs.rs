//! Container results returned by the three worker kinds (C6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::issue::ReviewIssue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HotspotLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotspot {
    pub file: String,
    pub line: u32,
    pub level: HotspotLevel,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub language: Option<String>,
    pub symbols: Vec<String>,
    pub call_edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParserOutput {
    pub files: Vec<FileMetadata>,
    pub hotspots: Vec<Hotspot>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewOutput {
    pub issues: Vec<ReviewIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub test_file_path: String,
    pub content: String,
    pub target_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestOutput {
    /// Generated tests grouped by the target test-file path they'd be
    /// written to.
    pub tests_by_path: HashMap<String, Vec<GeneratedTest>>,
}

impl TestOutput {
    pub fn is_empty(&self) -> bool {
        self.tests_by_path.values().all(|v| v.is_empty())
    }
}
