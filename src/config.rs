use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::exec::TimeoutClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub workspace: WorkspaceConfig,
    pub exec: ExecConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Verbose logging; also settable through the legacy `DEBUG` env var
    #[serde(default)]
    pub debug: bool,
}

/// A configured secret. Never printed, never serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in the auth header
    #[serde(default, skip_serializing)]
    pub secret: Option<Secret>,
    /// Header carrying the secret (default: X-Auth-Key)
    #[serde(default = "default_auth_header")]
    pub header: String,
}

fn default_auth_header() -> String {
    "X-Auth-Key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            header: default_auth_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory under which per-request workspaces are created
    pub root: String,
    /// Inactive workspaces older than this are swept (default: 3600 = 1 hour)
    #[serde(default = "default_orphan_max_age")]
    pub orphan_max_age_secs: u64,
    /// Seconds between janitor passes, 0 disables the janitor (default: 600)
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,
}

fn default_orphan_max_age() -> u64 {
    3600 // 1 hour
}

fn default_janitor_interval() -> u64 {
    600 // 10 minutes
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// git binary name or path
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
    /// Pull-request CLI binary name or path
    #[serde(default = "default_pr_tool")]
    pub pr_tool: String,
    /// Timeout for metadata operations (default: 60)
    #[serde(default = "default_short_timeout")]
    pub short_timeout_secs: u64,
    /// Timeout for clone/bundle transfer (default: 300 = 5 min)
    #[serde(default = "default_long_timeout")]
    pub long_timeout_secs: u64,
    /// Captured stdout/stderr are truncated past this many bytes (default: 1 MiB)
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,
    /// Maximum concurrently running clone/bundle workflows (default: 4)
    #[serde(default = "default_max_long_operations")]
    pub max_long_operations: usize,
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_pr_tool() -> String {
    "gh".to_string()
}

fn default_short_timeout() -> u64 {
    60
}

fn default_long_timeout() -> u64 {
    300 // 5 minutes
}

fn default_output_limit() -> usize {
    1024 * 1024
}

fn default_max_long_operations() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Token for private repository access, handed only to the subprocesses that need it
    #[serde(default, skip_serializing)]
    pub token: Option<Secret>,
    /// Permit local paths and file:// URLs as repositories
    #[serde(default)]
    pub allow_local_repos: bool,
    /// PR body used when the caller sends none
    #[serde(default = "default_pr_body")]
    pub default_pr_body: String,
}

fn default_pr_body() -> String {
    "Automated PR from git-relay".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            token: None,
            allow_local_repos: false,
            default_pr_body: default_pr_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted bundle upload (default: 512 MiB)
    #[serde(default = "default_max_bundle_bytes")]
    pub max_bundle_bytes: usize,
}

fn default_max_bundle_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_bundle_bytes: default_max_bundle_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// When set, logs are also written to a daily rolling file here
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

/// Shortest accepted shared secret
pub const MIN_SECRET_LEN: usize = 16;

/// Flat env names kept for compatibility with existing deployments.
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PROXY_SECRET_KEY", "auth.secret"),
    ("PORT", "server.port"),
    ("DEBUG", "server.debug"),
    ("GIT_WORKSPACE", "workspace.root"),
    ("GITHUB_TOKEN", "git.token"),
];

impl Config {
    /// Path of the config file picked up from the working directory
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("git-relay.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so the relay works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let local_config = Self::local_config_path();
        if local_config.exists() {
            builder = builder.add_source(config::File::from(local_config));
        }

        // User config in ~/.config/git-relay/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("git-relay").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with RELAY_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            builder = builder
                .set_override_option(*key, std::env::var(var).ok())
                .with_context(|| format!("Failed to apply {var}"))?;
        }

        let config = builder.build().context("Failed to load configuration")?;
        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay must not run with
    pub fn validate(&self) -> Result<()> {
        match &self.auth.secret {
            Some(secret) if secret.len() >= MIN_SECRET_LEN => {}
            Some(secret) if !secret.is_empty() => bail!(
                "Shared secret is too short: {} characters, at least {MIN_SECRET_LEN} required",
                secret.len()
            ),
            _ => bail!(
                "No shared secret configured. Set PROXY_SECRET_KEY or RELAY_AUTH__SECRET."
            ),
        }
        if self.auth.header.trim().is_empty() {
            bail!("auth.header must not be empty");
        }
        if self.exec.short_timeout_secs == 0 || self.exec.long_timeout_secs == 0 {
            bail!("exec timeouts must be positive");
        }
        if self.exec.max_long_operations == 0 {
            bail!("exec.max_long_operations must be at least 1");
        }
        Ok(())
    }

    /// Get absolute path to the workspace root
    pub fn workspace_root(&self) -> PathBuf {
        let path = PathBuf::from(&self.workspace.root);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Deadline for an operation of the given class
    pub fn timeout_for(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Short => Duration::from_secs(self.exec.short_timeout_secs),
            TimeoutClass::Long => Duration::from_secs(self.exec.long_timeout_secs),
        }
    }

    pub fn orphan_max_age(&self) -> Duration {
        Duration::from_secs(self.workspace.orphan_max_age_secs)
    }

    /// Age threshold for a one-off sweep. A separate process cannot see the
    /// server's active workspaces, so nothing younger than the long timeout
    /// is ever treated as an orphan.
    pub fn sweep_max_age(&self, override_secs: Option<u64>) -> Duration {
        override_secs
            .map_or_else(|| self.orphan_max_age(), Duration::from_secs)
            .max(self.timeout_for(TimeoutClass::Long))
    }
}

fn default_workspace_root() -> String {
    dirs::home_dir()
        .map(|home| home.join("git-relay-workspace"))
        .unwrap_or_else(|| std::env::temp_dir().join("git-relay-workspace"))
        .to_string_lossy()
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8443,
                debug: false,
            },
            auth: AuthConfig::default(),
            workspace: WorkspaceConfig {
                root: default_workspace_root(),
                orphan_max_age_secs: default_orphan_max_age(),
                janitor_interval_secs: default_janitor_interval(),
            },
            exec: ExecConfig {
                git_binary: default_git_binary(),
                pr_tool: default_pr_tool(),
                short_timeout_secs: default_short_timeout(),
                long_timeout_secs: default_long_timeout(),
                output_limit_bytes: default_output_limit(),
                max_long_operations: default_max_long_operations(),
            },
            git: GitConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
