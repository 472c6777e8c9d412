//! ============================================================================
//! Identity - Principal to storage key derivation
//! ============================================================================
//! The auth provider hands us an opaque subject id. Rows are keyed by a
//! UUID-shaped SHA-256 digest of it so the store never sees provider ids.
//! ============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Authenticated caller as supplied by the session provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// Storage key owning this principal's rows
    pub fn user_key(&self) -> UserKey {
        UserKey::derive(&self.subject)
    }
}

/// Persistence-layer owner key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey(String);

impl UserKey {
    /// Deterministic one-way mapping: sha256(subject) formatted 8-4-4-4-12
    pub fn derive(subject: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hash[0..8],
            &hash[8..12],
            &hash[12..16],
            &hash[16..20],
            &hash[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
