//! API state management for the REST server.

use std::sync::Arc;

use crate::auth::AuthGuard;
use crate::bundle::BundleService;
use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::exec::OperationExecutor;
use crate::git::GitCli;
use crate::pr::PrTool;
use crate::redact::Redactor;
use crate::rest::error::ApiError;
use crate::validate::CommandValidator;
use crate::workspace::WorkspaceManager;

/// Shared state for the REST API
#[derive(Clone, Debug)]
pub struct ApiState {
    /// Immutable configuration loaded at startup
    pub config: Arc<Config>,
    pub auth: AuthGuard,
    pub workspaces: WorkspaceManager,
    pub executor: OperationExecutor,
    pub git: GitCli,
    pub validator: CommandValidator,
    pub bundles: BundleService,
    pub redactor: Redactor,
    /// Resolved once at startup
    pub git_available: bool,
}

impl ApiState {
    /// Build every component from configuration. Fails without a secret.
    pub fn new(config: Config) -> RelayResult<Self> {
        let secret = config
            .auth
            .secret
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RelayError::Internal("no shared secret configured".to_string()))?;
        let auth = AuthGuard::new(secret);

        let workspaces = WorkspaceManager::new(config.workspace_root())?;
        let executor = OperationExecutor::from_config(&config);
        let git = GitCli::from_config(&config, executor.clone());
        let validator = CommandValidator::new(config.git.allow_local_repos);
        let bundles = BundleService::from_config(&config, &executor, workspaces.clone());
        let redactor = Redactor::from_config(&config);
        let git_available = which::which(&config.exec.git_binary).is_ok();

        Ok(Self {
            config: Arc::new(config),
            auth,
            workspaces,
            executor,
            git,
            validator,
            bundles,
            redactor,
            git_available,
        })
    }

    /// Swap the PR tool used by push-bundle
    pub fn with_pr_tool(mut self, pr_tool: Arc<dyn PrTool>) -> Self {
        self.bundles = self.bundles.with_pr_tool(pr_tool);
        self
    }

    /// Convert a relay error into a scrubbed API error
    pub fn fail(&self, err: RelayError) -> ApiError {
        ApiError::from_relay(err, &self.redactor)
    }
}
