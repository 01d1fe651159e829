//! The Credential Vault: a read-only, startup-populated
//! map from (providerId, keyId) to the bearer secret used on the wire.
//!
//! Stripped down from a general credential pool to just what this core
//! needs: no vendor-specific credential variants, no mutable runtime
//! registration API. This vault is built once by the config ingestion
//! boundary (`crate::config::build`) and never mutated afterward.

use std::collections::HashMap;

use relaymux_common::{Fingerprint, PipelineError};

/// The bearer string used on the wire. Never printed, serialized, or
/// otherwise surfaced outside of `resolve`'s return value.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

struct VaultEntry {
    secret: Secret,
    fingerprint: Fingerprint,
}

/// Populated once at startup; `resolve`/`fingerprint` are the only operations
/// exposed afterward. Shared by reference (read-only) across every Provider
/// adapter that needs a secret.
pub struct CredentialVault {
    entries: HashMap<(String, String), VaultEntry>,
}

impl CredentialVault {
    pub fn builder() -> CredentialVaultBuilder {
        CredentialVaultBuilder::default()
    }

    pub fn resolve(&self, provider_id: &str, key_id: &str) -> Result<&Secret, PipelineError> {
        self.entries
            .get(&(provider_id.to_string(), key_id.to_string()))
            .map(|entry| &entry.secret)
            .ok_or_else(|| PipelineError::CredentialMissing {
                provider_id: provider_id.to_string(),
                key_id: key_id.to_string(),
            })
    }

    pub fn fingerprint(&self, provider_id: &str, key_id: &str) -> Result<Fingerprint, PipelineError> {
        self.entries
            .get(&(provider_id.to_string(), key_id.to_string()))
            .map(|entry| entry.fingerprint.clone())
            .ok_or_else(|| PipelineError::CredentialMissing {
                provider_id: provider_id.to_string(),
                key_id: key_id.to_string(),
            })
    }

    /// Existence check used by the config ingestion boundary
    /// (`crate::config::build`) to validate every pipeline's `authRef`
    /// resolves to a known vault entry before the runtime structures are
    /// built.
    pub fn contains(&self, provider_id: &str, key_id: &str) -> bool {
        self.entries
            .contains_key(&(provider_id.to_string(), key_id.to_string()))
    }
}

#[derive(Default)]
pub struct CredentialVaultBuilder {
    entries: HashMap<(String, String), VaultEntry>,
}

impl CredentialVaultBuilder {
    pub fn insert(
        &mut self,
        provider_id: impl Into<String>,
        key_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> &mut Self {
        let provider_id = provider_id.into();
        let key_id = key_id.into();
        let secret = secret.into();
        let fingerprint = Fingerprint::compute(&provider_id, &key_id, &secret);
        self.entries.insert(
            (provider_id, key_id),
            VaultEntry {
                secret: Secret(secret),
                fingerprint,
            },
        );
        self
    }

    pub fn build(self) -> CredentialVault {
        CredentialVault {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fails_closed_for_an_unknown_pair() {
        let vault = CredentialVault::builder().build();
        let err = vault.resolve("openai", "missing").unwrap_err();
        assert!(matches!(err, PipelineError::CredentialMissing { .. }));
    }

    #[test]
    fn fingerprint_is_stable_for_a_known_pair() {
        let vault = CredentialVault::builder()
            .insert("openai", "key-a", "sk-secret")
            .build();
        let a = vault.fingerprint("openai", "key-a").unwrap();
        let b = vault.fingerprint("openai", "key-a").unwrap();
        assert_eq!(a, b);
        assert_eq!(vault.resolve("openai", "key-a").unwrap().expose(), "sk-secret");
    }
}
