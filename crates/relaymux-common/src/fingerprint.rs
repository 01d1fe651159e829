use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stable, one-way hash of a credential secret. Used
/// everywhere a credential needs to be identified — health tracking, logs,
/// snapshots — without ever surfacing the secret itself.
///
/// Computed over `providerId || "\0" || keyId || "\0" || Secret`, SHA-256,
/// hex-encoded, truncated to the first 16 hex characters for compactness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(provider_id: &str, key_id: &str, secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(provider_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(key_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_and_never_contains_the_secret() {
        let a = Fingerprint::compute("openai", "key-a", "sk-super-secret");
        let b = Fingerprint::compute("openai", "key-a", "sk-super-secret");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(!a.as_str().contains("super-secret"));
    }

    #[test]
    fn differs_when_any_input_changes() {
        let a = Fingerprint::compute("openai", "key-a", "sk-1");
        let b = Fingerprint::compute("openai", "key-b", "sk-1");
        let c = Fingerprint::compute("openai", "key-a", "sk-2");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
