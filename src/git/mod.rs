//! Typed git operations used by the bundle workflows and direct execution.

mod cli;

pub use cli::{GitCli, RefRange, ASKPASS_FILE};
