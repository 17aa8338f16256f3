//! Subprocess execution with deadlines and bounded output capture.
//!
//! Every operation is an explicit argument vector handed straight to the
//! program; no shell is ever involved. Children run in their own process
//! group so a timeout can take down everything they spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

/// Host environment variables a child is allowed to inherit
const INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "SSH_AUTH_SOCK",
    "XDG_CONFIG_HOME",
    "SYSTEMROOT",
];

/// How long output readers may lag behind process exit
const READER_GRACE: Duration = Duration::from_secs(5);
const READER_GRACE_AFTER_KILL: Duration = Duration::from_millis(500);

/// Deadline class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutClass {
    /// Metadata operations
    #[default]
    Short,
    /// Network transfer: clone, fetch, push, bundle
    Long,
}

impl TimeoutClass {
    /// Default class for a git subcommand
    pub fn for_git_subcommand(subcommand: &str) -> Self {
        match subcommand {
            "clone" | "fetch" | "pull" | "push" | "bundle" | "ls-remote" => TimeoutClass::Long,
            _ => TimeoutClass::Short,
        }
    }
}

/// A fully validated invocation
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: TimeoutClass,
    /// Extra variables on top of the inherited allowlist
    pub env: Vec<(String, String)>,
}

impl OperationRequest {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            timeout: TimeoutClass::Short,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, class: TimeoutClass) -> Self {
        self.timeout = class;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    /// Short label such as "git clone" for logs and errors
    pub fn describe(&self) -> String {
        let program = Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone());
        match self.args.iter().find(|a| !a.starts_with('-')) {
            Some(first) => format!("{} {}", program, first),
            None => program,
        }
    }
}

/// What a finished (or killed) process left behind
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub operation: String,
    /// None when the process was killed
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    pub timed_out: bool,
}

impl OperationResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Turn a timeout or non-zero exit into the matching error
    pub fn into_checked(self, timeout: Duration) -> RelayResult<Self> {
        if self.timed_out {
            return Err(RelayError::Timeout {
                operation: self.operation,
                timeout,
            });
        }
        if self.exit_code != Some(0) {
            return Err(RelayError::Execution {
                stderr: self.stderr_str().trim().to_string(),
                operation: self.operation,
                exit_code: self.exit_code,
            });
        }
        Ok(self)
    }
}

/// Runs operations under their class deadline
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    short_timeout: Duration,
    long_timeout: Duration,
    output_limit: usize,
}

impl OperationExecutor {
    pub fn new(short_timeout: Duration, long_timeout: Duration, output_limit: usize) -> Self {
        Self {
            short_timeout,
            long_timeout,
            output_limit,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.timeout_for(TimeoutClass::Short),
            config.timeout_for(TimeoutClass::Long),
            config.exec.output_limit_bytes,
        )
    }

    pub fn timeout(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Short => self.short_timeout,
            TimeoutClass::Long => self.long_timeout,
        }
    }

    pub fn output_limit(&self) -> usize {
        self.output_limit
    }

    /// Run the operation to completion or deadline.
    ///
    /// Only a failure to start the process is an `Err`; exit status and
    /// timeouts are reported in the result.
    #[instrument(skip_all, fields(op = %request.describe(), cwd = %request.cwd.display()))]
    pub async fn run(&self, request: &OperationRequest) -> RelayResult<OperationResult> {
        let deadline = self.timeout(request.timeout);
        debug!(args = ?request.args, ?deadline, "spawning");

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(inherited_env())
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RelayError::Spawn {
            program: request.program.clone(),
            source,
        })?;

        let limit = self.output_limit;
        let stdout_task = tokio::spawn(read_bounded(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(read_bounded(child.stderr.take(), limit));

        let (exit_code, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!(?deadline, "deadline exceeded, killing process group");
                terminate(&mut child).await;
                (None, true)
            }
        };

        let grace = if timed_out {
            READER_GRACE_AFTER_KILL
        } else {
            READER_GRACE
        };
        let (stdout, stdout_truncated) = collect(stdout_task, grace).await;
        let (stderr, stderr_truncated) = collect(stderr_task, grace).await;

        let result = OperationResult {
            operation: request.describe(),
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration: started.elapsed(),
            timed_out,
        };
        debug!(
            exit_code = ?result.exit_code,
            timed_out,
            elapsed_ms = result.duration.as_millis() as u64,
            "finished"
        );
        Ok(result)
    }

    /// Run and convert failure into an error
    pub async fn run_checked(&self, request: &OperationRequest) -> RelayResult<OperationResult> {
        let result = self.run(request).await?;
        result.into_checked(self.timeout(request.timeout))
    }
}

fn inherited_env() -> Vec<(String, String)> {
    INHERITED_ENV
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
        .collect()
}

/// Kill the child and everything in its process group, then reap it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after killpg failed");
    }
}

async fn collect(mut task: JoinHandle<(Vec<u8>, bool)>, grace: Duration) -> (Vec<u8>, bool) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // A descendant outside the process group still holds the pipe
            task.abort();
            (Vec::new(), true)
        }
    }
}

/// Read everything, keeping at most `limit` bytes
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}
