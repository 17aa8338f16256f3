//! Scrubs known credential values from caller-facing text.
//!
//! Matching is exact string replacement against secrets the relay actually
//! holds, so there are no false positives on look-alike tokens. Only text that
//! leaves the process (response bodies, error payloads) goes through here.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::config::Config;

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<RwLock<BTreeSet<String>>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track every secret present in the configuration
    pub fn from_config(config: &Config) -> Self {
        let redactor = Self::new();
        if let Some(secret) = &config.auth.secret {
            redactor.track(secret.expose());
        }
        if let Some(token) = &config.git.token {
            redactor.track(token.expose());
        }
        redactor
    }

    /// Track a credential that only becomes known at runtime
    pub fn track(&self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(secret.to_string());
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn redact(&self, text: &str) -> String {
        let Ok(secrets) = self.secrets.read() else {
            return text.to_string();
        };
        // Longest first so a secret containing another is replaced whole
        let mut ordered: Vec<&String> = secrets.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut result = text.to_string();
        for secret in ordered {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), REDACTED);
            }
        }
        result
    }
}
