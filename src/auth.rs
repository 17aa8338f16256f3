//! Shared-secret request authentication.
//!
//! Both sides are hashed before comparison so the check runs in time
//! independent of where (or whether) the values differ, including length.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::config::Secret;

/// Outcome of a credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized,
    Missing,
    Mismatch,
}

impl AuthDecision {
    pub fn is_authorized(self) -> bool {
        matches!(self, AuthDecision::Authorized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthDecision::Authorized => "authorized",
            AuthDecision::Missing => "missing_credential",
            AuthDecision::Mismatch => "invalid_credential",
        }
    }
}

/// Verifies the shared secret carried on every protected request
#[derive(Clone)]
pub struct AuthGuard {
    expected_digest: [u8; 32],
}

impl std::fmt::Debug for AuthGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGuard").finish_non_exhaustive()
    }
}

impl AuthGuard {
    pub fn new(secret: &Secret) -> Self {
        Self {
            expected_digest: digest(secret.expose()),
        }
    }

    /// Check a presented header value
    pub fn check(&self, presented: Option<&str>) -> AuthDecision {
        match presented {
            None => AuthDecision::Missing,
            Some(value) => {
                if digest(value)[..].ct_eq(&self.expected_digest[..]).into() {
                    AuthDecision::Authorized
                } else {
                    AuthDecision::Mismatch
                }
            }
        }
    }

    /// Check and emit the audit record for the attempt
    pub fn authorize(
        &self,
        presented: Option<&str>,
        endpoint: &str,
        origin: Option<&str>,
    ) -> AuthDecision {
        let decision = self.check(presented);
        info!(
            target: "audit",
            endpoint,
            origin = origin.unwrap_or("unknown"),
            authorized = decision.is_authorized(),
            outcome = decision.as_str(),
            "auth check"
        );
        decision
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AuthGuard {
        AuthGuard::new(&Secret::new("correct horse"))
    }

    #[test]
    fn test_matching_secret_is_authorized() {
        assert_eq!(guard().check(Some("correct horse")), AuthDecision::Authorized);
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let decision = guard().check(None);
        assert_eq!(decision, AuthDecision::Missing);
        assert!(!decision.is_authorized());
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        assert_eq!(guard().check(Some("correct")), AuthDecision::Mismatch);
        assert_eq!(guard().check(Some("")), AuthDecision::Mismatch);
        assert_eq!(
            guard().check(Some("correct horse ")),
            AuthDecision::Mismatch
        );
    }

    #[test]
    fn test_secrets_differing_only_in_length_mismatch() {
        let guard = AuthGuard::new(&Secret::new("0123456789abcdef"));
        assert_eq!(
            guard.check(Some("0123456789abcdef0")),
            AuthDecision::Mismatch
        );
        assert_eq!(guard.check(Some("0123456789abcde")), AuthDecision::Mismatch);
        assert_eq!(
            guard.check(Some("0123456789abcdef")),
            AuthDecision::Authorized
        );
    }

    #[test]
    fn test_debug_hides_digest() {
        let out = format!("{:?}", guard());
        assert_eq!(out, "AuthGuard { .. }");
    }
}
