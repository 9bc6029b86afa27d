//! Timing-safe API key verification.
//!
//! Both the configured secret and the presented candidate are hashed with
//! SHA-256 before comparison, so the compared buffers always have the same
//! length and [`subtle::ConstantTimeEq`] inspects every byte. Neither the
//! position of the first differing byte nor the candidate's length changes
//! how long a rejection takes.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Verifies presented credentials against an optional shared secret.
pub struct Authenticator {
    secret_digest: Option<[u8; 32]>,
}

impl Authenticator {
    /// Create an authenticator. `None` (or an empty key) enables public access.
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            secret_digest: api_key.filter(|k| !k.is_empty()).map(digest),
        }
    }

    /// Whether a secret is configured.
    pub fn enabled(&self) -> bool {
        self.secret_digest.is_some()
    }

    /// Check a presented credential.
    ///
    /// Always `true` in public-access mode.
    pub fn verify(&self, candidate: Option<&str>) -> bool {
        let Some(expected) = &self.secret_digest else {
            return true;
        };
        // A missing credential is still hashed so the reject path costs the same.
        let presented = digest(candidate.unwrap_or(""));
        let matches: bool = expected[..].ct_eq(&presented[..]).into();
        matches && candidate.is_some()
    }

    /// Short, non-reversible label for the configured key, used as the
    /// rate-limit identity of authenticated callers.
    pub fn key_label(&self) -> Option<String> {
        self.secret_digest.map(|d| hex_encode(&d[..4]))
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Encode bytes as a hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}
