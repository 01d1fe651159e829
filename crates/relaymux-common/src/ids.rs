use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique per-client-request identifier.
/// Carried through the whole lifetime of one client request, including any
/// failover retries it transitively triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (providerId, modelId, keyId) triple identifying one `Pipeline`
///. Canonical wire encoding is `providerId.modelId__keyId`;
/// `modelId` may itself contain dots, so only the *last* `__keyId` suffix is
/// treated as the split point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineHandle {
    pub provider_id: String,
    pub model_id: String,
    pub key_id: String,
}

impl PipelineHandle {
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            key_id: key_id.into(),
        }
    }

    /// Encodes as `providerId.modelId__keyId`.
    pub fn encode(&self) -> String {
        format!("{}.{}__{}", self.provider_id, self.model_id, self.key_id)
    }

    /// Parses `providerId.modelId__keyId`, splitting on the *last* `__`.
    /// Returns `None` if there is no `providerId.` prefix at all.
    pub fn parse(encoded: &str) -> Option<Self> {
        let (provider_id, rest) = encoded.split_once('.')?;
        let (model_id, key_id) = match rest.rsplit_once("__") {
            Some((model_id, key_id)) => (model_id, key_id),
            None => (rest, ""),
        };
        Some(Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            key_id: key_id.to_string(),
        })
    }
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_parse() {
        let handle = PipelineHandle::new("openai", "gpt-4.1", "key-a");
        let encoded = handle.encode();
        assert_eq!(encoded, "openai.gpt-4.1__key-a");
        assert_eq!(PipelineHandle::parse(&encoded).unwrap(), handle);
    }

    #[test]
    fn splits_on_the_last_double_underscore() {
        let handle = PipelineHandle::parse("openai.gpt-4.1__key-a").unwrap();
        assert_eq!(handle.provider_id, "openai");
        assert_eq!(handle.model_id, "gpt-4.1");
        assert_eq!(handle.key_id, "key-a");
    }
}
