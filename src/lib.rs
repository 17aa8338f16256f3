//! git-relay - authenticated HTTP relay for sandboxed git operations
//!
//! Accepts git commands and bundle transfers over HTTP, validates them,
//! and runs them inside per-request workspaces that never outlive the
//! request.

pub mod auth;
pub mod bundle;
pub mod config;
pub mod env_vars;
pub mod error;
pub mod exec;
pub mod git;
pub mod logging;
pub mod pr;
pub mod redact;
pub mod rest;
pub mod validate;
pub mod workspace;
