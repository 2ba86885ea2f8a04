//! Wire shapes for `/bot/*`, mirroring `backend.schemas.api`.

use serde::{Deserialize, Serialize};

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequestDto {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub branch: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub head_owner: Option<String>,
    #[serde(default)]
    pub head_repo: Option<String>,
    #[serde(default)]
    pub changed_files: Option<Vec<String>>,
    #[serde(default)]
    pub installation_id: u64,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnitTestRequestDto {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub branch: String,
    #[serde(default)]
    pub installation_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct PrUnitTestRequestDto {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub branch: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub installation_id: u64,
    pub target_files: Vec<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub existing_test_files: Vec<String>,
    #[serde(default = "default_test_framework")]
    pub test_framework: String,
    #[serde(default)]
    pub requested_by: Option<String>,
}

fn default_test_framework() -> String {
    "unknown".to_string()
}

#[derive(Debug, Serialize)]
pub struct TaskResponseDto {
    pub task_id: String,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_branch: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponseDto {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}
