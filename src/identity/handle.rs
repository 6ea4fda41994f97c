//! Shareable handles.
//!
//! A handle is the lowercase hex SHA-256 of a user id. It is unsalted on
//! purpose: anyone who knows an id can compute the same handle, which is what
//! lets a user hand theirs out for contact lookup without exposing the raw
//! id in the lookup itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded one-way digest of a user id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleHash(String);

impl HandleHash {
    /// Length of the hex rendering
    pub const LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for HandleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HandleHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the handle of `id`. Pure and deterministic; the empty string
/// hashes like any other input.
pub fn hash(id: &str) -> HandleHash {
    HandleHash(hex::encode(Sha256::digest(id.as_bytes())))
}
