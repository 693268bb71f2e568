//! Caller identity resolution.
//!
//! A pure lookup with no dependencies on other resources: the account
//! identity is derived deterministically from the supplied access key so
//! that repeated resolutions (and test runs) agree on ARN rendering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::params::Credentials;

/// Resolved identity of the provisioning principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

impl CallerIdentity {
    /// Resolves the caller's account identity from its credentials.
    pub fn resolve(credentials: &Credentials) -> Self {
        let account_id = derive_account_id(&credentials.access_key);
        let arn = format!("arn:aws:iam::{account_id}:root");
        Self { account_id, arn }
    }
}

/// Maps an access key onto a stable 12-digit account number.
fn derive_account_id(access_key: &str) -> String {
    let digest = Sha256::digest(access_key.as_bytes());
    digest
        .iter()
        .take(12)
        .map(|byte| char::from(b'0' + byte % 10))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(access_key: &str) -> Credentials {
        Credentials {
            access_key: access_key.into(),
            secret_key: "irrelevant".into(),
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let a = CallerIdentity::resolve(&credentials("AKIAEXAMPLE"));
        let b = CallerIdentity::resolve(&credentials("AKIAEXAMPLE"));
        assert_eq!(a, b);
    }

    #[test]
    fn account_id_is_twelve_digits() {
        let identity = CallerIdentity::resolve(&credentials("AKIAEXAMPLE"));
        assert_eq!(identity.account_id.len(), 12);
        assert!(identity.account_id.chars().all(|c| c.is_ascii_digit()));
        assert!(identity.arn.starts_with("arn:aws:iam::"));
    }

    #[test]
    fn distinct_keys_resolve_to_distinct_accounts() {
        let a = CallerIdentity::resolve(&credentials("AKIAONE"));
        let b = CallerIdentity::resolve(&credentials("AKIATWO"));
        assert_ne!(a.account_id, b.account_id);
    }
}
