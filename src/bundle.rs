//! fetch-bundle and push-bundle workflows.
//!
//! Both run inside a single workspace and hold a long-operation permit while
//! they talk to the remote. A failed step releases the workspace before the
//! error is returned; a successful fetch hands the workspace to the
//! [`FetchedBundle`] so the directory outlives the response body.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::{RelayError, RelayResult, ValidationError};
use crate::exec::OperationExecutor;
use crate::git::{GitCli, RefRange};
use crate::pr::{GhCli, PrRequest, PrTool};
use crate::validate::{validate_ref_name, CommandValidator};
use crate::workspace::{Workspace, WorkspaceManager};

/// Checkout directory inside a workspace
const CLONE_DIR: &str = "repo";
/// Mirror directory inside a workspace
const MIRROR_DIR: &str = "repo.git";
/// Where an uploaded bundle is stored inside a workspace
pub const UPLOAD_FILE: &str = "upload.bundle";

/// Progress of a bundle workflow, logged at each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    Received,
    Validated,
    WorkspaceAcquired,
    Executing,
    Completed,
    Failed,
    WorkspaceReleased,
}

impl WorkflowStage {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Received => "received",
            WorkflowStage::Validated => "validated",
            WorkflowStage::WorkspaceAcquired => "workspace_acquired",
            WorkflowStage::Executing => "executing",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
            WorkflowStage::WorkspaceReleased => "workspace_released",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn stage(workflow: &'static str, request_id: &str, stage: WorkflowStage) {
    info!(workflow, request_id, stage = stage.as_str(), "workflow stage");
}

/// Inputs of a push-bundle request, minus the bundle itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRequest {
    pub repo_url: String,
    pub branch: String,
    pub create_pr: bool,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    pub base: Option<String>,
}

impl PushRequest {
    pub fn validate(&self, validator: &CommandValidator) -> Result<(), ValidationError> {
        if self.repo_url.is_empty() {
            return Err(ValidationError::MissingField("repo_url"));
        }
        if self.branch.is_empty() {
            return Err(ValidationError::MissingField("branch"));
        }
        validator.validate_repo_url(&self.repo_url)?;
        validate_ref_name(&self.branch)?;
        if let Some(base) = &self.base {
            validate_ref_name(base)?;
        }
        Ok(())
    }

    fn pr_request(&self, default_body: &str) -> PrRequest {
        let title = self
            .pr_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Changes from {}", self.branch));
        let body = self
            .pr_body
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| default_body.to_string());
        PrRequest {
            title,
            body,
            head: self.branch.clone(),
            base: self.base.clone(),
        }
    }
}

/// Result of a push-bundle request. The push and the PR are reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PushOutcome {
    pub pushed: bool,
    pub branch: String,
    /// Commit the branch points at after the push
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_error: Option<String>,
}

/// A verified bundle waiting to be streamed out
#[derive(Debug)]
pub struct FetchedBundle {
    workspace: Workspace,
    path: PathBuf,
    file_name: String,
    size: u64,
}

impl FetchedBundle {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the bundle as a byte stream. The workspace is deleted when the
    /// stream is dropped, which is after the body has been sent.
    pub async fn into_stream(self) -> RelayResult<BundleStream> {
        let opened = File::open(&self.path).await;
        match opened {
            Ok(file) => Ok(BundleStream {
                inner: ReaderStream::new(file),
                _workspace: self.workspace,
            }),
            Err(e) => {
                self.workspace.release().await;
                Err(e.into())
            }
        }
    }

    /// Give up on streaming and remove the workspace now
    pub async fn discard(self) {
        self.workspace.release().await;
    }
}

/// Bundle bytes tied to the lifetime of their workspace
pub struct BundleStream {
    inner: ReaderStream<File>,
    _workspace: Workspace,
}

impl Stream for BundleStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Composes workspaces, git and the PR tool into the two workflows
#[derive(Clone)]
pub struct BundleService {
    git: GitCli,
    pr_tool: Arc<dyn PrTool>,
    workspaces: WorkspaceManager,
    validator: CommandValidator,
    long_permits: Arc<Semaphore>,
    default_pr_body: String,
}

impl std::fmt::Debug for BundleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleService")
            .field("git", &self.git)
            .field("pr_tool", &self.pr_tool.name())
            .field("available_permits", &self.long_permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl BundleService {
    pub fn new(
        git: GitCli,
        pr_tool: Arc<dyn PrTool>,
        workspaces: WorkspaceManager,
        validator: CommandValidator,
        max_long_operations: usize,
        default_pr_body: impl Into<String>,
    ) -> Self {
        Self {
            git,
            pr_tool,
            workspaces,
            validator,
            long_permits: Arc::new(Semaphore::new(max_long_operations.max(1))),
            default_pr_body: default_pr_body.into(),
        }
    }

    pub fn from_config(
        config: &Config,
        executor: &OperationExecutor,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self::new(
            GitCli::from_config(config, executor.clone()),
            Arc::new(GhCli::from_config(config, executor.clone())),
            workspaces,
            CommandValidator::new(config.git.allow_local_repos),
            config.exec.max_long_operations,
            config.git.default_pr_body.clone(),
        )
    }

    /// Replace the PR tool
    pub fn with_pr_tool(mut self, pr_tool: Arc<dyn PrTool>) -> Self {
        self.pr_tool = pr_tool;
        self
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Clone `repo_url` and produce a verified bundle of `range`
    #[instrument(skip(self, repo_url, range), fields(range = %range))]
    pub async fn fetch_bundle(
        &self,
        request_id: &str,
        repo_url: &str,
        range: RefRange,
    ) -> RelayResult<FetchedBundle> {
        const WORKFLOW: &str = "fetch-bundle";
        stage(WORKFLOW, request_id, WorkflowStage::Received);
        self.validator.validate_repo_url(repo_url)?;
        stage(WORKFLOW, request_id, WorkflowStage::Validated);

        let _permit = self
            .long_permits
            .acquire()
            .await
            .map_err(|_| RelayError::Internal("operation limiter closed".to_string()))?;
        let workspace = self.workspaces.acquire(request_id).await?;
        stage(WORKFLOW, request_id, WorkflowStage::WorkspaceAcquired);

        let file_name = format!("{}.bundle", repo_name(repo_url));
        let created = self
            .create_bundle(&workspace, repo_url, &range, &file_name)
            .await;
        match created {
            Ok((path, size)) => {
                stage(WORKFLOW, request_id, WorkflowStage::Completed);
                info!(%file_name, size, "bundle ready");
                Ok(FetchedBundle {
                    workspace,
                    path,
                    file_name,
                    size,
                })
            }
            Err(e) => {
                warn!(error = %e, "fetch-bundle failed");
                stage(WORKFLOW, request_id, WorkflowStage::Failed);
                workspace.release().await;
                stage(WORKFLOW, request_id, WorkflowStage::WorkspaceReleased);
                Err(e)
            }
        }
    }

    async fn create_bundle(
        &self,
        workspace: &Workspace,
        repo_url: &str,
        range: &RefRange,
        file_name: &str,
    ) -> RelayResult<(PathBuf, u64)> {
        let git = self.git.for_workspace(workspace.path()).await?;
        stage("fetch-bundle", workspace.request_id(), WorkflowStage::Executing);

        let mirror = workspace.join(MIRROR_DIR);
        git.clone_mirror(repo_url, &mirror, workspace.path()).await?;

        let bundle = workspace.join(file_name);
        git.bundle_create(&mirror, &bundle, range).await?;
        git.bundle_verify(&mirror, &bundle)
            .await
            .map_err(|e| match e {
                // A bundle we just wrote failing verification is our problem
                RelayError::Validation(ValidationError::InvalidBundle(stderr)) => {
                    RelayError::Execution {
                        operation: "git bundle verify".to_string(),
                        exit_code: None,
                        stderr,
                    }
                }
                other => other,
            })?;

        let size = tokio::fs::metadata(&bundle).await?.len();
        Ok((bundle, size))
    }

    /// Allocate the workspace an upload is streamed into
    pub async fn upload_workspace(&self, request_id: &str) -> RelayResult<Workspace> {
        let workspace = self.workspaces.acquire(request_id).await?;
        stage("push-bundle", request_id, WorkflowStage::WorkspaceAcquired);
        Ok(workspace)
    }

    /// Apply an uploaded bundle to `repo_url` and push `branch`.
    ///
    /// The workspace is released before returning, whatever the outcome.
    #[instrument(skip_all, fields(request_id = %workspace.request_id(), branch = %request.branch))]
    pub async fn push_bundle(
        &self,
        workspace: Workspace,
        bundle: &Path,
        request: &PushRequest,
    ) -> RelayResult<PushOutcome> {
        const WORKFLOW: &str = "push-bundle";
        let request_id = workspace.request_id().to_string();
        stage(WORKFLOW, &request_id, WorkflowStage::Received);

        let result = match request.validate(&self.validator) {
            Ok(()) => {
                stage(WORKFLOW, &request_id, WorkflowStage::Validated);
                self.apply_and_push(&workspace, bundle, request).await
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(outcome) => {
                stage(WORKFLOW, &request_id, WorkflowStage::Completed);
                info!(
                    branch = %outcome.branch,
                    pr_created = ?outcome.pr_created,
                    "push-bundle finished"
                );
            }
            Err(e) => {
                warn!(error = %e, "push-bundle failed");
                stage(WORKFLOW, &request_id, WorkflowStage::Failed);
            }
        }
        workspace.release().await;
        stage(WORKFLOW, &request_id, WorkflowStage::WorkspaceReleased);
        result
    }

    async fn apply_and_push(
        &self,
        workspace: &Workspace,
        bundle: &Path,
        request: &PushRequest,
    ) -> RelayResult<PushOutcome> {
        let _permit = self
            .long_permits
            .acquire()
            .await
            .map_err(|_| RelayError::Internal("operation limiter closed".to_string()))?;
        let git = self.git.for_workspace(workspace.path()).await?;
        stage("push-bundle", workspace.request_id(), WorkflowStage::Executing);

        let repo = workspace.join(CLONE_DIR);
        git.clone_repo(&request.repo_url, &repo, workspace.path()).await?;
        git.bundle_verify(&repo, bundle).await?;
        git.fetch_from_bundle(&repo, bundle, &request.branch).await?;
        let commit = git
            .rev_parse(&repo, &format!("refs/heads/{}", request.branch))
            .await?;
        git.push(&repo, "origin", &request.branch).await?;
        info!(branch = %request.branch, %commit, "branch pushed");

        let mut outcome = PushOutcome {
            pushed: true,
            branch: request.branch.clone(),
            commit: Some(commit),
            pr_created: None,
            pr_url: None,
            pr_error: None,
        };

        if request.create_pr {
            let pr = request.pr_request(&self.default_pr_body);
            match self.pr_tool.create_pr(&repo, &pr).await {
                Ok(url) => {
                    outcome.pr_created = Some(true);
                    outcome.pr_url = Some(url);
                }
                Err(e) => {
                    warn!(tool = self.pr_tool.name(), error = %e, "PR creation failed after push");
                    outcome.pr_created = Some(false);
                    outcome.pr_error = Some(e.to_string());
                }
            }
        }
        Ok(outcome)
    }
}

/// File-name-safe repository name taken from the last URL segment
pub fn repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let last = last.strip_suffix(".git").unwrap_or(last);
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "repository".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://github.com/owner/repo.git"), "repo");
        assert_eq!(repo_name("https://github.com/owner/repo/"), "repo");
        assert_eq!(repo_name("git@github.com:owner/my-repo.git"), "my-repo");
        assert_eq!(repo_name("/srv/git/thing.git"), "thing");
        assert_eq!(repo_name("https://host/a/we\"ird"), "weird");
        assert_eq!(repo_name("https://host/.."), "repository");
        assert_eq!(repo_name(""), "repository");
    }

    #[test]
    fn test_push_request_validation() {
        let validator = CommandValidator::new(false);
        let mut req = PushRequest {
            repo_url: "https://github.com/o/r.git".to_string(),
            branch: "feature/x".to_string(),
            ..Default::default()
        };
        assert!(req.validate(&validator).is_ok());

        req.branch = "bad..branch".to_string();
        assert!(matches!(
            req.validate(&validator),
            Err(ValidationError::InvalidRefName { .. })
        ));

        req.branch = String::new();
        assert_eq!(
            req.validate(&validator),
            Err(ValidationError::MissingField("branch"))
        );

        req.branch = "ok".to_string();
        req.repo_url = "ext::sh -c id".to_string();
        assert!(matches!(
            req.validate(&validator),
            Err(ValidationError::InvalidRepoUrl { .. })
        ));

        req.repo_url = "https://github.com/o/r.git".to_string();
        req.base = Some("-x".to_string());
        assert!(req.validate(&validator).is_err());
    }

    #[test]
    fn test_pr_request_defaults() {
        let req = PushRequest {
            repo_url: "https://github.com/o/r.git".to_string(),
            branch: "feature".to_string(),
            create_pr: true,
            pr_title: Some("  ".to_string()),
            ..Default::default()
        };
        let pr = req.pr_request("Automated PR");
        assert_eq!(pr.title, "Changes from feature");
        assert_eq!(pr.body, "Automated PR");
        assert_eq!(pr.head, "feature");
        assert_eq!(pr.base, None);

        let req = PushRequest {
            pr_title: Some("Add thing".to_string()),
            pr_body: Some("Details".to_string()),
            base: Some("develop".to_string()),
            ..req
        };
        let pr = req.pr_request("Automated PR");
        assert_eq!(pr.title, "Add thing");
        assert_eq!(pr.body, "Details");
        assert_eq!(pr.base.as_deref(), Some("develop"));
    }

    #[test]
    fn test_push_outcome_omits_unset_pr_fields() {
        let outcome = PushOutcome {
            pushed: true,
            branch: "main".to_string(),
            commit: None,
            pr_created: None,
            pr_url: None,
            pr_error: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"pushed": true, "branch": "main"}));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(WorkflowStage::WorkspaceAcquired.to_string(), "workspace_acquired");
        assert_eq!(WorkflowStage::Failed.as_str(), "failed");
    }
}
