//! Request validation: command vectors, repository URLs, ref names and
//! workspace-confined paths.
//!
//! Nothing here touches a subprocess. A rejection is always a client error.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;
use crate::exec::TimeoutClass;

/// The only program the direct-exec path runs
pub const GIT_PROGRAM: &str = "git";

/// Subcommands reachable through direct execution
pub const ALLOWED_SUBCOMMANDS: &[&str] = &[
    "status", "log", "show", "diff", "branch", "tag", "rev-parse", "rev-list", "ls-remote",
    "ls-files", "ls-tree", "cat-file", "describe", "shortlog", "blame", "clone", "fetch", "pull",
    "push", "init", "add", "commit", "checkout", "switch", "merge", "reset", "stash", "remote",
    "bundle", "version",
];

/// Global options accepted before the subcommand
const ALLOWED_GLOBAL_OPTIONS: &[&str] = &["--no-pager", "-P", "--literal-pathspecs"];

/// Options that run arbitrary programs, inject config or relocate the repository
const FORBIDDEN_OPTIONS: &[&str] = &[
    "-c",
    "-C",
    "--config",
    "--config-env",
    "--git-dir",
    "--work-tree",
    "--exec-path",
    "--namespace",
    "--upload-pack",
    "--receive-pack",
    "--exec",
    "--template",
    "--separate-git-dir",
];

/// Subcommands where `-u` means `--upload-pack`
const UPLOAD_PACK_SHORT_FLAG: &[&str] = &["clone", "fetch", "pull", "ls-remote"];

/// Options whose value is free text, never a path
const MESSAGE_OPTIONS: &[&str] = &["-m", "--message"];

const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '>', '<', '\n', '\r', '\0'];
const FORBIDDEN_SEQUENCES: &[&str] = &["$(", "${"];

/// `<transport>::<address>` remote-helper syntax (ext::, fd::, ...)
static REMOTE_HELPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*::").expect("valid regex"));

/// scp-like `user@host:path`
static SCP_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._~-]+@[A-Za-z0-9.-]+:[^/\\].*$").expect("valid regex")
});

static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://(.*)$").expect("valid regex"));

/// A direct-exec command that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    /// Arguments after the program name
    pub args: Vec<String>,
    pub subcommand: String,
    /// Absolute working directory inside the workspace
    pub cwd: PathBuf,
    pub timeout: TimeoutClass,
}

#[derive(Debug, Clone, Default)]
pub struct CommandValidator {
    allow_local_repos: bool,
}

impl CommandValidator {
    pub fn new(allow_local_repos: bool) -> Self {
        Self { allow_local_repos }
    }

    /// Validate a caller-supplied token vector against the workspace it will run in.
    ///
    /// `workspace` must be canonical. `cwd` is relative to it.
    pub fn validate_command(
        &self,
        tokens: &[String],
        workspace: &Path,
        cwd: Option<&str>,
        timeout: Option<TimeoutClass>,
    ) -> Result<ValidatedCommand, ValidationError> {
        let rest = self.check_tokens(tokens)?;

        let cwd = match cwd {
            Some(dir) if !dir.is_empty() => resolve_in_workspace(workspace, workspace, dir)?,
            _ => workspace.to_path_buf(),
        };

        // Global options, then the subcommand
        let mut iter = rest.iter().peekable();
        let mut subcommand = None;
        while let Some(token) = iter.next() {
            if token == "--version" {
                subcommand = Some("version".to_string());
                break;
            }
            if token.starts_with('-') {
                if !ALLOWED_GLOBAL_OPTIONS.contains(&token.as_str()) {
                    return Err(ValidationError::OptionNotAllowed(token.clone()));
                }
                continue;
            }
            subcommand = Some(token.clone());
            break;
        }
        let subcommand = subcommand.ok_or(ValidationError::EmptyCommand)?;
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand.as_str()) {
            return Err(ValidationError::SubcommandNotAllowed(subcommand));
        }

        let mut skip_value = false;
        let mut after_separator = false;
        for token in iter {
            if skip_value {
                skip_value = false;
                continue;
            }
            if !after_separator && token == "--" {
                after_separator = true;
                continue;
            }
            if !after_separator && token.starts_with('-') {
                let (name, value) = match token.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (token.as_str(), None),
                };
                self.check_option(&subcommand, name)?;
                if MESSAGE_OPTIONS.contains(&name) {
                    skip_value = value.is_none();
                    continue;
                }
                if let Some(value) = value {
                    self.check_operand(workspace, &cwd, value)?;
                }
                continue;
            }
            self.check_operand(workspace, &cwd, token)?;
        }

        Ok(ValidatedCommand {
            args: rest.to_vec(),
            timeout: timeout.unwrap_or_else(|| TimeoutClass::for_git_subcommand(&subcommand)),
            subcommand,
            cwd,
        })
    }

    /// Program name and metacharacter checks, which need no workspace.
    /// Returns the arguments after the program.
    pub fn check_tokens<'a>(&self, tokens: &'a [String]) -> Result<&'a [String], ValidationError> {
        let (program, rest) = tokens.split_first().ok_or(ValidationError::EmptyCommand)?;
        if program != GIT_PROGRAM {
            return Err(ValidationError::ProgramNotAllowed {
                program: program.clone(),
                expected: GIT_PROGRAM.to_string(),
            });
        }
        for (index, token) in tokens.iter().enumerate() {
            check_metacharacters(index, token)?;
        }
        Ok(rest)
    }

    /// git accepts unambiguous long-option prefixes (`--upload-pac`) and short
    /// options with the value glued on (`-u<cmd>`, `-qu<cmd>`), so both forms
    /// are matched here, not only the exact spelling.
    fn check_option(&self, subcommand: &str, name: &str) -> Result<(), ValidationError> {
        let rejected = || Err(ValidationError::OptionNotAllowed(name.to_string()));

        if name.starts_with("--") {
            if name.len() > 2
                && FORBIDDEN_OPTIONS
                    .iter()
                    .any(|f| f.starts_with("--") && f.starts_with(name))
            {
                return rejected();
            }
            return Ok(());
        }

        let Some(cluster) = name.strip_prefix('-') else {
            return Ok(());
        };
        // `-m<text>` is a glued commit/tag message on subcommands that take one
        if cluster.starts_with('m') && !UPLOAD_PACK_SHORT_FLAG.contains(&subcommand) {
            return Ok(());
        }
        if cluster.chars().any(|c| is_forbidden_short(subcommand, c)) {
            return rejected();
        }
        Ok(())
    }

    /// A positional argument is either a remote or a potential path
    fn check_operand(
        &self,
        workspace: &Path,
        cwd: &Path,
        token: &str,
    ) -> Result<(), ValidationError> {
        if REMOTE_HELPER.is_match(token) {
            return Err(ValidationError::InvalidRepoUrl {
                url: token.to_string(),
                reason: "remote helper transports are not allowed".to_string(),
            });
        }
        if URL_SCHEME.is_match(token) || SCP_LIKE.is_match(token) {
            return self.validate_repo_url(token);
        }
        if looks_like_path(token) || first_component_exists(cwd, token) {
            resolve_in_workspace(workspace, cwd, token)?;
        }
        Ok(())
    }

    /// Validate a repository location supplied for a bundle workflow
    pub fn validate_repo_url(&self, url: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidRepoUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        if url.is_empty() {
            return Err(ValidationError::MissingField("repo_url"));
        }
        if url.starts_with('-') {
            return Err(invalid("must not start with '-'"));
        }
        if url.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(invalid("contains whitespace or control characters"));
        }
        if REMOTE_HELPER.is_match(url) {
            return Err(invalid("remote helper transports are not allowed"));
        }

        if let Some(caps) = URL_SCHEME.captures(url) {
            let scheme = caps[1].to_ascii_lowercase();
            let rest = &caps[2];
            return match scheme.as_str() {
                "https" | "http" | "ssh" | "git" => {
                    let host = rest.split('/').next().unwrap_or_default();
                    let host = host.rsplit('@').next().unwrap_or_default();
                    if host.is_empty() {
                        Err(invalid("missing host"))
                    } else {
                        Ok(())
                    }
                }
                "file" if self.allow_local_repos => Ok(()),
                "file" => Err(invalid("local repositories are not allowed")),
                _ => Err(invalid("unsupported URL scheme")),
            };
        }

        if SCP_LIKE.is_match(url) {
            return Ok(());
        }

        if self.allow_local_repos && Path::new(url).is_absolute() {
            return Ok(());
        }
        if looks_like_path(url) || !url.contains(':') {
            return Err(invalid("local repositories are not allowed"));
        }
        Err(invalid("unsupported URL format"))
    }
}

fn is_forbidden_short(subcommand: &str, flag: char) -> bool {
    match flag {
        'c' | 'C' => true,
        'u' => UPLOAD_PACK_SHORT_FLAG.contains(&subcommand),
        _ => false,
    }
}

fn check_metacharacters(index: usize, token: &str) -> Result<(), ValidationError> {
    if let Some(found) = token.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(ValidationError::ShellMetacharacter { index, found });
    }
    if FORBIDDEN_SEQUENCES.iter().any(|seq| token.contains(seq)) {
        return Err(ValidationError::ShellMetacharacter { index, found: '$' });
    }
    Ok(())
}

fn looks_like_path(token: &str) -> bool {
    token.starts_with('~')
        || Path::new(token).is_absolute()
        || Path::new(token)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}

/// Operands naming something already in the working tree are treated as paths
fn first_component_exists(cwd: &Path, token: &str) -> bool {
    Path::new(token)
        .components()
        .next()
        .is_some_and(|first| cwd.join(first).symlink_metadata().is_ok())
}

/// Resolve `candidate` (relative to `base`) and require it to stay inside
/// `workspace`, following `..` and any symlinks that exist on disk.
pub fn resolve_in_workspace(
    workspace: &Path,
    base: &Path,
    candidate: &str,
) -> Result<PathBuf, ValidationError> {
    let escape = || ValidationError::PathEscapesWorkspace(candidate.to_string());

    if candidate.starts_with('~') {
        return Err(escape());
    }
    let joined = if Path::new(candidate).is_absolute() {
        PathBuf::from(candidate)
    } else {
        base.join(candidate)
    };

    let normalized = normalize_lexically(&joined).ok_or_else(escape)?;
    if !normalized.starts_with(workspace) {
        return Err(escape());
    }
    let resolved = resolve_existing_prefix(&normalized).ok_or_else(escape)?;
    if !resolved.starts_with(workspace) {
        return Err(escape());
    }
    Ok(resolved)
}

/// Collapse `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Canonicalize the deepest existing ancestor and re-append the rest
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    loop {
        if existing.symlink_metadata().is_ok() {
            break;
        }
        remainder.push(existing.file_name()?.to_os_string());
        if !existing.pop() {
            return None;
        }
    }

    let mut resolved = existing.canonicalize().ok()?;
    for part in remainder.into_iter().rev() {
        resolved.push(part);
    }
    Some(resolved)
}

/// Check a branch or ref name against git's ref format rules
pub fn validate_ref_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidRefName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > 255 {
        return Err(invalid("too long"));
    }
    if name.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if name == "@" {
        return Err(invalid("'@' is not a valid ref"));
    }
    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return Err(invalid("contains a forbidden sequence"));
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(invalid("contains a forbidden character"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.ends_with('.') {
        return Err(invalid("must not start or end with '/' or end with '.'"));
    }
    if name
        .split('/')
        .any(|part| part.starts_with('.') || part.ends_with(".lock"))
    {
        return Err(invalid("path component starts with '.' or ends with '.lock'"));
    }
    Ok(())
}
