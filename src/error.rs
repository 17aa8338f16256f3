//! Error taxonomy shared by the relay components.

use std::time::Duration;

use thiserror::Error;

/// Why a request was refused before anything ran
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("only '{expected}' may be executed, got '{program}'")]
    ProgramNotAllowed { program: String, expected: String },

    #[error("git subcommand '{0}' is not allowed")]
    SubcommandNotAllowed(String),

    #[error("option '{0}' is not allowed")]
    OptionNotAllowed(String),

    #[error("argument {index} contains forbidden character {found:?}")]
    ShellMetacharacter { index: usize, found: char },

    #[error("path '{0}' resolves outside the workspace")]
    PathEscapesWorkspace(String),

    #[error("invalid repository URL '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("invalid ref name '{name}': {reason}")]
    InvalidRefName { name: String, reason: String },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("upload exceeds the limit of {limit} bytes")]
    UploadTooLarge { limit: usize },
}

/// Errors surfaced by relay operations and workflows
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{operation} failed with exit code {exit_code:?}")]
    Execution {
        operation: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{operation} timed out after {}s", timeout.as_secs_f64())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    /// Captured stderr, when the failure came from a subprocess
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RelayError::Execution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout { .. })
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
