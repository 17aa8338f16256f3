//! Environment variable registry for documentation and `git-relay env`.
//!
//! Lists every variable the relay reads. Structured overrides use the
//! `RELAY_` prefix with `__` between section and key; the flat legacy names
//! are still honored by [`crate::config::Config::load`].

use std::fmt::Write as _;

/// Documented environment variable
#[derive(Debug, Clone)]
pub struct EnvVar {
    pub name: &'static str,
    pub description: &'static str,
    pub category: EnvVarCategory,
    pub required: bool,
    pub default: Option<&'static str>,
    pub example: Option<&'static str>,
}

/// Categories for grouping environment variables in docs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvVarCategory {
    Authentication,
    Server,
    Workspace,
    Execution,
    Git,
    Limits,
    Logging,
    Legacy,
}

impl EnvVarCategory {
    /// Human-readable display name for the category
    pub fn display_name(&self) -> &'static str {
        match self {
            EnvVarCategory::Authentication => "Authentication",
            EnvVarCategory::Server => "Server",
            EnvVarCategory::Workspace => "Workspace",
            EnvVarCategory::Execution => "Execution",
            EnvVarCategory::Git => "Git",
            EnvVarCategory::Limits => "Limits",
            EnvVarCategory::Logging => "Logging",
            EnvVarCategory::Legacy => "Legacy names",
        }
    }

    /// All categories in display order
    pub fn all() -> &'static [EnvVarCategory] {
        &[
            EnvVarCategory::Authentication,
            EnvVarCategory::Server,
            EnvVarCategory::Workspace,
            EnvVarCategory::Execution,
            EnvVarCategory::Git,
            EnvVarCategory::Limits,
            EnvVarCategory::Logging,
            EnvVarCategory::Legacy,
        ]
    }
}

/// Static registry of all documented environment variables
pub static ENV_VARS: &[EnvVar] = &[
    // === Authentication ===
    EnvVar {
        name: "RELAY_AUTH__SECRET",
        description: "Shared secret every protected request must present (at least 16 characters)",
        category: EnvVarCategory::Authentication,
        required: true,
        default: None,
        example: Some("3f9c..."),
    },
    EnvVar {
        name: "RELAY_AUTH__HEADER",
        description: "Request header carrying the shared secret",
        category: EnvVarCategory::Authentication,
        required: false,
        default: Some("X-Auth-Key"),
        example: Some("X-Relay-Key"),
    },
    // === Server ===
    EnvVar {
        name: "RELAY_SERVER__HOST",
        description: "Address the HTTP server binds to",
        category: EnvVarCategory::Server,
        required: false,
        default: Some("127.0.0.1"),
        example: Some("0.0.0.0"),
    },
    EnvVar {
        name: "RELAY_SERVER__PORT",
        description: "Port the HTTP server listens on",
        category: EnvVarCategory::Server,
        required: false,
        default: Some("8443"),
        example: Some("9000"),
    },
    EnvVar {
        name: "RELAY_SERVER__DEBUG",
        description: "Enable debug logging",
        category: EnvVarCategory::Server,
        required: false,
        default: Some("false"),
        example: Some("true"),
    },
    // === Workspace ===
    EnvVar {
        name: "RELAY_WORKSPACE__ROOT",
        description: "Directory under which per-request workspaces are created",
        category: EnvVarCategory::Workspace,
        required: false,
        default: Some("~/git-relay-workspace"),
        example: Some("/var/lib/git-relay"),
    },
    EnvVar {
        name: "RELAY_WORKSPACE__ORPHAN_MAX_AGE_SECS",
        description: "Age after which a leftover workspace is removed by the janitor",
        category: EnvVarCategory::Workspace,
        required: false,
        default: Some("3600"),
        example: Some("600"),
    },
    EnvVar {
        name: "RELAY_WORKSPACE__JANITOR_INTERVAL_SECS",
        description: "Seconds between orphan sweeps",
        category: EnvVarCategory::Workspace,
        required: false,
        default: Some("600"),
        example: Some("60"),
    },
    // === Execution ===
    EnvVar {
        name: "RELAY_EXEC__GIT_BINARY",
        description: "git executable name or path",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("git"),
        example: Some("/usr/bin/git"),
    },
    EnvVar {
        name: "RELAY_EXEC__PR_TOOL",
        description: "Pull-request CLI executable name or path",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("gh"),
        example: Some("/usr/local/bin/gh"),
    },
    EnvVar {
        name: "RELAY_EXEC__SHORT_TIMEOUT_SECS",
        description: "Timeout for metadata operations such as status and log",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("60"),
        example: Some("30"),
    },
    EnvVar {
        name: "RELAY_EXEC__LONG_TIMEOUT_SECS",
        description: "Timeout for clone, fetch, push and bundle operations",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("300"),
        example: Some("900"),
    },
    EnvVar {
        name: "RELAY_EXEC__OUTPUT_LIMIT_BYTES",
        description: "Captured stdout/stderr are truncated past this size",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("1048576"),
        example: Some("65536"),
    },
    EnvVar {
        name: "RELAY_EXEC__MAX_LONG_OPERATIONS",
        description: "Maximum concurrently running bundle workflows",
        category: EnvVarCategory::Execution,
        required: false,
        default: Some("4"),
        example: Some("8"),
    },
    // === Git ===
    EnvVar {
        name: "RELAY_GIT__TOKEN",
        description: "Token for private repositories, given to git via askpass and to the PR tool",
        category: EnvVarCategory::Git,
        required: false,
        default: None,
        example: Some("ghp_..."),
    },
    EnvVar {
        name: "RELAY_GIT__ALLOW_LOCAL_REPOS",
        description: "Permit local paths and file:// URLs as repository sources",
        category: EnvVarCategory::Git,
        required: false,
        default: Some("false"),
        example: Some("true"),
    },
    EnvVar {
        name: "RELAY_GIT__DEFAULT_PR_BODY",
        description: "Pull request body used when the caller sends none",
        category: EnvVarCategory::Git,
        required: false,
        default: Some("Automated PR from git-relay"),
        example: None,
    },
    // === Limits ===
    EnvVar {
        name: "RELAY_LIMITS__MAX_BUNDLE_BYTES",
        description: "Largest accepted bundle upload",
        category: EnvVarCategory::Limits,
        required: false,
        default: Some("536870912"),
        example: Some("104857600"),
    },
    // === Logging ===
    EnvVar {
        name: "RELAY_LOGGING__LEVEL",
        description: "Log level filter (trace, debug, info, warn, error)",
        category: EnvVarCategory::Logging,
        required: false,
        default: Some("info"),
        example: Some("debug"),
    },
    EnvVar {
        name: "RELAY_LOGGING__DIRECTORY",
        description: "Also write logs to a daily rolling file in this directory",
        category: EnvVarCategory::Logging,
        required: false,
        default: None,
        example: Some("/var/log/git-relay"),
    },
    EnvVar {
        name: "RUST_LOG",
        description: "Full tracing filter directive, overrides the configured level",
        category: EnvVarCategory::Logging,
        required: false,
        default: None,
        example: Some("git_relay=debug,audit=info"),
    },
    // === Legacy ===
    EnvVar {
        name: "PROXY_SECRET_KEY",
        description: "Legacy name for RELAY_AUTH__SECRET",
        category: EnvVarCategory::Legacy,
        required: false,
        default: None,
        example: None,
    },
    EnvVar {
        name: "PORT",
        description: "Legacy name for RELAY_SERVER__PORT",
        category: EnvVarCategory::Legacy,
        required: false,
        default: None,
        example: Some("8443"),
    },
    EnvVar {
        name: "DEBUG",
        description: "Legacy name for RELAY_SERVER__DEBUG",
        category: EnvVarCategory::Legacy,
        required: false,
        default: None,
        example: Some("true"),
    },
    EnvVar {
        name: "GIT_WORKSPACE",
        description: "Legacy name for RELAY_WORKSPACE__ROOT",
        category: EnvVarCategory::Legacy,
        required: false,
        default: None,
        example: Some("/tmp/git-workspace"),
    },
    EnvVar {
        name: "GITHUB_TOKEN",
        description: "Legacy name for RELAY_GIT__TOKEN",
        category: EnvVarCategory::Legacy,
        required: false,
        default: None,
        example: None,
    },
];

/// Get all environment variables for a given category
pub fn env_vars_for_category(category: EnvVarCategory) -> impl Iterator<Item = &'static EnvVar> {
    ENV_VARS.iter().filter(move |v| v.category == category)
}

/// Get environment variables grouped by category
pub fn env_vars_by_category() -> Vec<(EnvVarCategory, Vec<&'static EnvVar>)> {
    EnvVarCategory::all()
        .iter()
        .map(|cat| {
            let vars: Vec<&EnvVar> = env_vars_for_category(*cat).collect();
            (*cat, vars)
        })
        .filter(|(_, vars)| !vars.is_empty())
        .collect()
}

/// Render the registry as plain text, grouped by category
pub fn render() -> String {
    let mut out = String::new();
    for (category, vars) in env_vars_by_category() {
        let _ = writeln!(out, "{}", category.display_name());
        for var in vars {
            let marker = if var.required { " (required)" } else { "" };
            let _ = writeln!(out, "  {}{}", var.name, marker);
            let _ = writeln!(out, "      {}", var.description);
            if let Some(default) = var.default {
                let _ = writeln!(out, "      default: {default}");
            }
            if let Some(example) = var.example {
                let _ = writeln!(out, "      example: {example}");
            }
        }
        out.push('\n');
    }
    out
}
