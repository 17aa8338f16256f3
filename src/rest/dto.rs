//! Data Transfer Objects for the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::exec::{OperationResult, TimeoutClass};
use crate::redact::Redactor;
use crate::workspace::WorkspaceInfo;

// =============================================================================
// Health
// =============================================================================

/// Liveness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub workspace_root: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    /// Whether the configured git binary was found on this host
    pub git_available: bool,
}

// =============================================================================
// Direct execution
// =============================================================================

/// A git invocation as a token vector, e.g. `["git", "status"]`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecRequest {
    pub command: Vec<String>,
    /// Working directory relative to the request workspace
    #[serde(default)]
    pub cwd: Option<String>,
    /// Deadline class; defaults by subcommand
    #[serde(default)]
    pub timeout: Option<TimeoutClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stdout_truncated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

impl ExecResponse {
    pub fn from_result(result: &OperationResult, redactor: &Redactor) -> Self {
        Self {
            stdout: redactor.redact(&result.stdout_str()),
            stderr: redactor.redact(&result.stderr_str()),
            exit_code: result.exit_code,
            stdout_truncated: result.stdout_truncated,
            stderr_truncated: result.stderr_truncated,
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

// =============================================================================
// Bundles
// =============================================================================

/// Source repository and history to bundle
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FetchBundleRequest {
    pub repo_url: String,
    /// Branch or ref to bundle; every ref when omitted
    #[serde(default, rename = "ref", alias = "branch")]
    pub reference: Option<String>,
    /// Exclude history reachable from this ref or commit
    #[serde(default)]
    pub since: Option<String>,
}

/// Multipart form accepted by `/git/push-bundle`
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct PushBundleForm {
    #[schema(value_type = String, format = Binary)]
    pub bundle: Vec<u8>,
    pub repo_url: String,
    pub branch: String,
    /// "true" to open a pull request after pushing
    pub create_pr: Option<bool>,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    /// Base branch of the pull request
    pub base: Option<String>,
}

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceListResponse {
    pub root: String,
    pub count: usize,
    pub workspaces: Vec<WorkspaceInfo>,
}
