//! Git CLI wrapper for the relay workflows.
//!
//! Every call goes through the [`OperationExecutor`], so git runs with the
//! restricted environment, a deadline and bounded output. Credentials for
//! private remotes are handed over through an askpass script; the token itself
//! only ever travels in the subprocess environment.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::config::{Config, Secret};
use crate::error::{RelayError, RelayResult, ValidationError};
use crate::exec::{OperationExecutor, OperationRequest, OperationResult, TimeoutClass};
use crate::validate::{validate_ref_name, ValidatedCommand};

/// Name of the askpass helper written into a workspace
pub const ASKPASS_FILE: &str = ".relay-askpass";

/// Env var the askpass helper reads the token from
const TOKEN_ENV: &str = "RELAY_GIT_TOKEN";

const ASKPASS_SCRIPT: &str = "#!/bin/sh\n\
case \"$1\" in\n\
  Username*) echo x-access-token ;;\n\
  *) echo \"$RELAY_GIT_TOKEN\" ;;\n\
esac\n";

/// Which history a bundle covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefRange {
    /// Every ref
    #[default]
    All,
    /// A single ref and its full history
    Ref(String),
    /// Commits reachable from `tip` but not from `base`
    Range { base: String, tip: String },
}

impl RefRange {
    /// Build from the optional `ref` and `since` request fields
    pub fn from_request(
        reference: Option<&str>,
        since: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let reference = reference.filter(|r| !r.is_empty());
        let since = since.filter(|s| !s.is_empty());

        if let Some(r) = reference {
            validate_ref_name(r)?;
        }
        if let Some(s) = since {
            validate_ref_name(s)?;
        }

        Ok(match (reference, since) {
            (None, None) => RefRange::All,
            (Some(r), None) => RefRange::Ref(r.to_string()),
            (tip, Some(base)) => RefRange::Range {
                base: base.to_string(),
                tip: tip.unwrap_or("HEAD").to_string(),
            },
        })
    }

    fn bundle_args(&self) -> Vec<String> {
        match self {
            RefRange::All => vec!["--all".to_string()],
            RefRange::Ref(r) => vec![r.clone()],
            RefRange::Range { base, tip } => vec![format!("{base}..{tip}")],
        }
    }
}

impl std::fmt::Display for RefRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefRange::All => write!(f, "--all"),
            RefRange::Ref(r) => write!(f, "{r}"),
            RefRange::Range { base, tip } => write!(f, "{base}..{tip}"),
        }
    }
}

/// Git command wrapper bound to one executor and credential set
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    executor: OperationExecutor,
    token: Option<Secret>,
    askpass: Option<PathBuf>,
    /// Repository discovery stops here
    ceiling: Option<PathBuf>,
}

impl GitCli {
    pub fn new(binary: impl Into<String>, executor: OperationExecutor, token: Option<Secret>) -> Self {
        Self {
            binary: binary.into(),
            executor,
            token: token.filter(|t| !t.is_empty()),
            askpass: None,
            ceiling: None,
        }
    }

    pub fn from_config(config: &Config, executor: OperationExecutor) -> Self {
        Self::new(&config.exec.git_binary, executor, config.git.token.clone())
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// A copy of this wrapper whose subprocesses authenticate through an
    /// askpass helper inside `workspace`. Without a token only the discovery
    /// ceiling is set.
    pub async fn for_workspace(&self, workspace: &Path) -> RelayResult<GitCli> {
        let mut git = self.clone();
        git.ceiling = workspace.parent().map(Path::to_path_buf);
        if self.token.is_none() {
            return Ok(git);
        }
        let script = workspace.join(ASKPASS_FILE);
        write_askpass(&script).await?;
        debug!(path = %script.display(), "askpass helper written");
        git.askpass = Some(script);
        Ok(git)
    }

    fn request(&self, cwd: &Path, class: TimeoutClass) -> OperationRequest {
        let mut request = OperationRequest::new(&self.binary, cwd).timeout(class);
        if let Some(ceiling) = &self.ceiling {
            request = request.env("GIT_CEILING_DIRECTORIES", ceiling.to_string_lossy());
        }
        if let (Some(token), Some(askpass)) = (&self.token, &self.askpass) {
            request = request
                .env("GIT_ASKPASS", askpass.to_string_lossy())
                .env(TOKEN_ENV, token.expose());
        }
        request
    }

    /// Execute a git command and fail on non-zero exit or timeout
    async fn run_git(
        &self,
        args: &[&str],
        cwd: &Path,
        class: TimeoutClass,
    ) -> RelayResult<OperationResult> {
        let request = self.request(cwd, class).args(args.iter().copied());
        self.executor.run_checked(&request).await
    }

    /// Run a validated direct-exec command; the caller inspects the exit status
    #[instrument(skip_all, fields(subcommand = %command.subcommand))]
    pub async fn run_validated(&self, command: &ValidatedCommand) -> RelayResult<OperationResult> {
        let request = self
            .request(&command.cwd, command.timeout)
            .args(command.args.iter().cloned());
        self.executor.run(&request).await
    }

    /// Mirror-clone every ref of `url` into `dest`
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn clone_mirror(&self, url: &str, dest: &Path, cwd: &Path) -> RelayResult<()> {
        let dest = dest.to_string_lossy();
        self.run_git(&["clone", "--mirror", "--", url, &*dest], cwd, TimeoutClass::Long)
            .await?;
        Ok(())
    }

    /// Clone `url` into a working tree at `dest`
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn clone_repo(&self, url: &str, dest: &Path, cwd: &Path) -> RelayResult<()> {
        let dest = dest.to_string_lossy();
        self.run_git(&["clone", "--", url, &*dest], cwd, TimeoutClass::Long)
            .await?;
        Ok(())
    }

    /// Write a bundle of `range` from `repo` to `output`
    #[instrument(skip_all, fields(repo = %repo.display(), range = %range))]
    pub async fn bundle_create(&self, repo: &Path, output: &Path, range: &RefRange) -> RelayResult<()> {
        let output = output.to_string_lossy().to_string();
        let mut args = vec!["bundle".to_string(), "create".to_string(), output];
        args.extend(range.bundle_args());
        let request = self.request(repo, TimeoutClass::Long).args(args);
        self.executor.run_checked(&request).await?;
        Ok(())
    }

    /// Check that `bundle` is well formed and its prerequisites exist in `repo`
    #[instrument(skip_all, fields(repo = %repo.display()))]
    pub async fn bundle_verify(&self, repo: &Path, bundle: &Path) -> RelayResult<()> {
        let bundle = bundle.to_string_lossy();
        match self
            .run_git(&["bundle", "verify", &*bundle], repo, TimeoutClass::Long)
            .await
        {
            Ok(_) => Ok(()),
            Err(RelayError::Execution { stderr, .. }) => {
                Err(ValidationError::InvalidBundle(stderr).into())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch `branch` from a bundle file into the same local branch
    #[instrument(skip_all, fields(repo = %repo.display(), branch))]
    pub async fn fetch_from_bundle(&self, repo: &Path, bundle: &Path, branch: &str) -> RelayResult<()> {
        let bundle = bundle.to_string_lossy();
        let refspec = format!("{branch}:refs/heads/{branch}");
        self.run_git(
            &["fetch", "--update-head-ok", &*bundle, refspec.as_str()],
            repo,
            TimeoutClass::Long,
        )
        .await?;
        Ok(())
    }

    /// Push a local branch to the same name on `remote`
    #[instrument(skip_all, fields(repo = %repo.display(), remote, branch))]
    pub async fn push(&self, repo: &Path, remote: &str, branch: &str) -> RelayResult<()> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        self.run_git(&["push", remote, refspec.as_str()], repo, TimeoutClass::Long)
            .await?;
        Ok(())
    }

    /// Resolve a revision to its object id
    #[instrument(skip_all, fields(repo = %repo.display(), rev))]
    pub async fn rev_parse(&self, repo: &Path, rev: &str) -> RelayResult<String> {
        let result = self
            .run_git(&["rev-parse", "--verify", rev], repo, TimeoutClass::Short)
            .await?;
        Ok(result.stdout_str().trim().to_string())
    }
}

#[cfg(unix)]
async fn write_askpass(path: &Path) -> RelayResult<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o700)
        .open(path)
        .await?;
    file.write_all(ASKPASS_SCRIPT.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_askpass(path: &Path) -> RelayResult<()> {
    Err(RelayError::Internal(format!(
        "askpass helpers are not supported on this platform ({})",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor() -> OperationExecutor {
        OperationExecutor::new(Duration::from_secs(30), Duration::from_secs(60), 1024 * 1024)
    }

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    /// A repository with one commit on `main`
    async fn seed_repo(dir: &Path) -> PathBuf {
        let repo = dir.join("origin");
        std::fs::create_dir_all(&repo).unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(&repo)
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@example.com")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@example.com")
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        run(&["add", "README.md"]);
        run(&["commit", "-q", "-m", "initial"]);
        repo
    }

    #[test]
    fn test_ref_range_from_request() {
        assert_eq!(RefRange::from_request(None, None).unwrap(), RefRange::All);
        assert_eq!(
            RefRange::from_request(Some("main"), None).unwrap(),
            RefRange::Ref("main".to_string())
        );
        assert_eq!(
            RefRange::from_request(Some("main"), Some("v1.0")).unwrap(),
            RefRange::Range {
                base: "v1.0".to_string(),
                tip: "main".to_string()
            }
        );
        assert_eq!(
            RefRange::from_request(Some(""), Some("abc123")).unwrap(),
            RefRange::Range {
                base: "abc123".to_string(),
                tip: "HEAD".to_string()
            }
        );
        assert!(RefRange::from_request(Some("--all"), None).is_err());
        assert!(RefRange::from_request(None, Some("a..b")).is_err());
    }

    #[test]
    fn test_ref_range_bundle_args() {
        assert_eq!(RefRange::All.bundle_args(), vec!["--all"]);
        let range = RefRange::Range {
            base: "v1".to_string(),
            tip: "main".to_string(),
        };
        assert_eq!(range.bundle_args(), vec!["v1..main"]);
        assert_eq!(range.to_string(), "v1..main");
    }

    #[tokio::test]
    async fn test_for_workspace_without_token_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let git = GitCli::new("git", executor(), None);
        let scoped = git.for_workspace(dir.path()).await.unwrap();
        assert!(scoped.askpass.is_none());
        assert!(!dir.path().join(ASKPASS_FILE).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_for_workspace_keeps_token_out_of_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let git = GitCli::new("git", executor(), Some(Secret::new("ghp_secret")));
        let scoped = git.for_workspace(dir.path()).await.unwrap();

        let script = dir.path().join(ASKPASS_FILE);
        assert_eq!(scoped.askpass.as_deref(), Some(script.as_path()));
        let contents = std::fs::read_to_string(&script).unwrap();
        assert!(!contents.contains("ghp_secret"));
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let request = scoped.request(dir.path(), TimeoutClass::Short);
        assert!(request
            .env
            .iter()
            .any(|(k, v)| k == TOKEN_ENV && v == "ghp_secret"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_askpass_answers_prompts() {
        let dir = TempDir::new().unwrap();
        let git = GitCli::new("git", executor(), Some(Secret::new("tok")));
        git.for_workspace(dir.path()).await.unwrap();
        let script = dir.path().join(ASKPASS_FILE);

        let user = std::process::Command::new(&script)
            .arg("Username for 'https://github.com': ")
            .env(TOKEN_ENV, "tok")
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&user.stdout).trim(), "x-access-token");

        let pass = std::process::Command::new(&script)
            .arg("Password for 'https://x-access-token@github.com': ")
            .env(TOKEN_ENV, "tok")
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&pass.stdout).trim(), "tok");
    }

    #[tokio::test]
    async fn test_mirror_clone_bundle_and_verify() {
        if !git_available() {
            eprintln!("Skipping: git not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = seed_repo(dir.path()).await;
        let git = GitCli::new("git", executor(), None);

        let mirror = dir.path().join("mirror.git");
        git.clone_mirror(&origin.to_string_lossy(), &mirror, dir.path())
            .await
            .unwrap();

        let bundle = dir.path().join("out.bundle");
        git.bundle_create(&mirror, &bundle, &RefRange::All)
            .await
            .unwrap();
        git.bundle_verify(&mirror, &bundle).await.unwrap();

        let head = git.rev_parse(&origin, "HEAD").await.unwrap();
        assert_eq!(git.rev_parse(&mirror, "main").await.unwrap(), head);
        assert_eq!(head.len(), 40);
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage_bundle() {
        if !git_available() {
            eprintln!("Skipping: git not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = seed_repo(dir.path()).await;
        let bogus = dir.path().join("bogus.bundle");
        std::fs::write(&bogus, b"not a bundle").unwrap();

        let git = GitCli::new("git", executor(), None);
        let err = git.bundle_verify(&origin, &bogus).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Validation(ValidationError::InvalidBundle(_))
        ));
    }

    #[tokio::test]
    async fn test_clone_failure_carries_stderr() {
        if !git_available() {
            eprintln!("Skipping: git not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let git = GitCli::new("git", executor(), None);
        let missing = dir.path().join("does-not-exist");
        let err = git
            .clone_repo(&missing.to_string_lossy(), &dir.path().join("dest"), dir.path())
            .await
            .unwrap_err();
        let stderr = err.stderr().unwrap_or_default();
        assert!(!stderr.is_empty(), "expected git stderr, got {err:?}");
    }
}
