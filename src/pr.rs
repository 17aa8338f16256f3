//! Pull-request creation through an external PR tool.
//!
//! The bundle workflow only needs "open a PR for this pushed branch", so the
//! seam is a small trait; `GhCli` implements it with `gh pr create`.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{Config, Secret};
use crate::error::RelayError;
use crate::exec::{OperationExecutor, OperationRequest, TimeoutClass};

static PR_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+/pull/\d+").expect("valid regex"));

/// What to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrError {
    #[error("PR tool '{0}' is not installed")]
    NotInstalled(String),

    #[error("a pull request for this branch already exists: {url}")]
    AlreadyExists { url: String },

    #[error("PR tool timed out")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait PrTool: Send + Sync {
    /// Tool name for logs
    fn name(&self) -> &str;

    /// Open a PR from the clone at `repo_dir`, returning its URL
    async fn create_pr(&self, repo_dir: &Path, request: &PrRequest) -> Result<String, PrError>;
}

/// `gh` CLI implementation
#[derive(Debug, Clone)]
pub struct GhCli {
    binary: String,
    executor: OperationExecutor,
    token: Option<Secret>,
}

impl GhCli {
    pub fn new(binary: impl Into<String>, executor: OperationExecutor, token: Option<Secret>) -> Self {
        Self {
            binary: binary.into(),
            executor,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn from_config(config: &Config, executor: OperationExecutor) -> Self {
        Self::new(&config.exec.pr_tool, executor, config.git.token.clone())
    }

    fn args(request: &PrRequest) -> Vec<String> {
        let mut args = vec![
            "pr".to_string(),
            "create".to_string(),
            "--head".to_string(),
            request.head.clone(),
            "--title".to_string(),
            request.title.clone(),
            "--body".to_string(),
            request.body.clone(),
        ];
        if let Some(base) = &request.base {
            args.push("--base".to_string());
            args.push(base.clone());
        }
        args
    }
}

#[async_trait]
impl PrTool for GhCli {
    fn name(&self) -> &str {
        &self.binary
    }

    #[instrument(skip_all, fields(head = %request.head))]
    async fn create_pr(&self, repo_dir: &Path, request: &PrRequest) -> Result<String, PrError> {
        let mut op = OperationRequest::new(&self.binary, repo_dir)
            .timeout(TimeoutClass::Long)
            .args(Self::args(request))
            .env("GH_PROMPT_DISABLED", "1")
            .env("NO_COLOR", "1");
        if let Some(token) = &self.token {
            op = op.env("GH_TOKEN", token.expose());
        }

        let result = match self.executor.run(&op).await {
            Ok(result) => result,
            Err(RelayError::Spawn { program, .. }) => return Err(PrError::NotInstalled(program)),
            Err(e) => return Err(PrError::Failed(e.to_string())),
        };
        if result.timed_out {
            warn!("PR tool timed out");
            return Err(PrError::Timeout);
        }

        let stdout = result.stdout_str();
        let stderr = result.stderr_str();
        if !result.success() {
            if stderr.contains("already exists") {
                if let Some(url) = extract_pr_url(&stderr) {
                    return Err(PrError::AlreadyExists { url });
                }
            }
            let message = stderr.trim();
            return Err(PrError::Failed(if message.is_empty() {
                format!("exit code {:?}", result.exit_code)
            } else {
                message.to_string()
            }));
        }

        let url = extract_pr_url(&stdout)
            .or_else(|| {
                stdout
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| PrError::Failed("PR tool produced no URL".to_string()))?;
        info!(%url, "pull request created");
        Ok(url)
    }
}

fn extract_pr_url(text: &str) -> Option<String> {
    PR_URL.find(text).map(|m| m.as_str().to_string())
}
