//! Credential material for one API account
//!
//! A credential is a key/secret token pair. Two credentials are the same
//! account exactly when both halves match. The fingerprint is the only form
//! that ever reaches logs or the dispatch manifest.

use std::fmt;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::Secret;

/// One account's authentication material. Immutable once loaded.
#[derive(Clone, Deserialize)]
pub struct Credential {
    #[serde(deserialize_with = "secret_string")]
    key: Secret<String>,
    #[serde(deserialize_with = "secret_string")]
    secret: Secret<String>,
    /// Calls allowed per rate-limit window when the API does not report it.
    #[serde(default)]
    quota_ceiling: Option<u32>,
}

impl Credential {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: Secret::new(key.into()),
            secret: Secret::new(secret.into()),
            quota_ceiling: None,
        }
    }

    /// Override the per-window call ceiling for this credential only.
    pub fn with_quota_ceiling(mut self, ceiling: u32) -> Self {
        self.quota_ceiling = Some(ceiling);
        self
    }

    pub fn key(&self) -> &Secret<String> {
        &self.key
    }

    pub fn secret(&self) -> &Secret<String> {
        &self.secret
    }

    pub fn quota_ceiling(&self) -> Option<u32> {
        self.quota_ceiling
    }

    /// Short, stable identifier derived from the token pair (first 12 hex
    /// digits of SHA-256 over `key:secret`).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.expose().as_bytes());
        hasher.update(b":");
        hasher.update(self.secret.expose().as_bytes());
        hasher
            .finalize()
            .iter()
            .take(6)
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// True when both credentials carry the same token pair.
    pub fn same_account(&self, other: &Credential) -> bool {
        self.key == other.key && self.secret == other.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint())
            .field("quota_ceiling", &self.quota_ceiling)
            .finish()
    }
}

fn secret_string<'de, D>(deserializer: D) -> std::result::Result<Secret<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(Secret::new)
}
