//! Route handlers for the REST API.

pub mod bundle;
pub mod exec;
pub mod health;
pub mod workspace;
