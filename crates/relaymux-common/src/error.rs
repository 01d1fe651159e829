use thiserror::Error;

use crate::ids::{PipelineHandle, RequestId};

/// The single discriminated error type that crosses every stage and manager
/// boundary. Component-local error types (a
/// credential-pool acquire error, a dialect-translation failure) convert into
/// one of these variants at the point they cross into pipeline/manager code;
/// none of them leak past this type.
///
/// No variant carries a credential `Secret`; callers that need to reference a
/// credential use its `Fingerprint` instead.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Client body not well-formed for its declared dialect.
    #[error("dialect translation failed ({direction}, {dialect}): {reason}")]
    DialectTranslationFailed {
        direction: &'static str,
        dialect: &'static str,
        reason: String,
    },
    /// The route category is empty or every handle in it is degraded.
    #[error("no route available for category {category:?}")]
    NoRouteAvailable { category: String },
    /// A pipeline refers to an unknown (providerId, keyId) pair.
    #[error("credential missing for {provider_id}/{key_id}")]
    CredentialMissing { provider_id: String, key_id: String },
    /// The provider rejected the translated request outright.
    #[error("upstream {provider_id}/{model_id} rejected the request: {message}")]
    UpstreamBadRequest {
        provider_id: String,
        model_id: String,
        base_url: String,
        message: String,
    },
    /// The provider returned HTTP 429.
    #[error("upstream {provider_id}/{model_id} rate limited the request")]
    UpstreamRateLimited {
        provider_id: String,
        model_id: String,
        base_url: String,
        retry_after_secs: Option<u64>,
    },
    /// The provider returned a 5xx, or the transport failed outright.
    #[error("upstream {provider_id}/{model_id} unavailable: {reason}")]
    UpstreamUnavailable {
        provider_id: String,
        model_id: String,
        base_url: String,
        reason: String,
    },
    /// The adapter's timer expired waiting on the provider.
    #[error("upstream {provider_id}/{model_id} timed out after {elapsed_ms}ms")]
    UpstreamTimeout {
        provider_id: String,
        model_id: String,
        elapsed_ms: u64,
    },
    /// The upstream body could not be parsed.
    #[error("upstream {provider_id}/{model_id} body malformed: {reason}")]
    UpstreamMalformed {
        provider_id: String,
        model_id: String,
        reason: String,
    },
    /// The retry budget was consumed across 429s without success.
    #[error(
        "retry budget exhausted for category {category:?} after {attempts} attempt(s), excluded {}",
        excluded.len()
    )]
    RateLimitExhausted {
        category: String,
        attempts: u32,
        excluded: Vec<PipelineHandle>,
    },
    /// The client went away; no further emission follows.
    #[error("request {request_id} cancelled")]
    Cancelled { request_id: RequestId },
    /// A retry was attempted after the first SSE byte had already been
    /// emitted to the client. This must never occur; seeing it is a bug.
    #[error("retry attempted after stream commit for request {request_id}")]
    StreamCommitted { request_id: RequestId },
    /// A failure internal to the core (e.g. re-serializing a passthrough
    /// response) with no upstream or dialect-translation counterpart.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PipelineError {
    /// Tags a stage-local failure with the pipeline/stage/request context
    /// required before it propagates past the stage it happened in. The
    /// concrete context already lives on most variants; this is the single
    /// place code builds those variants from a raw stage failure.
    pub fn dialect_translation_failed(
        direction: &'static str,
        dialect: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::DialectTranslationFailed {
            direction,
            dialect,
            reason: reason.into(),
        }
    }

    /// No `LogicalRoute` is registered under this alias, or every candidate in
    /// it is currently excluded/ineligible.
    pub fn route_not_found(alias: impl Into<String>) -> Self {
        Self::NoRouteAvailable {
            category: alias.into(),
        }
    }

    /// The retry loop ran out of candidates without ever recording a more
    /// specific failure.
    pub fn no_eligible_pipeline(alias: impl Into<String>) -> Self {
        Self::NoRouteAvailable {
            category: alias.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// HTTP status mapping for non-streaming surfacing.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::DialectTranslationFailed { .. } => 400,
            PipelineError::NoRouteAvailable { .. } => 503,
            PipelineError::CredentialMissing { .. } => 500,
            PipelineError::UpstreamBadRequest { .. } => 400,
            PipelineError::UpstreamRateLimited { .. } => 429,
            PipelineError::UpstreamUnavailable { .. } => 503,
            PipelineError::UpstreamTimeout { .. } => 504,
            PipelineError::UpstreamMalformed { .. } => 502,
            PipelineError::RateLimitExhausted { .. } => 429,
            PipelineError::Cancelled { .. } => 499,
            PipelineError::StreamCommitted { .. } => 500,
            PipelineError::Internal { .. } => 500,
        }
    }

    /// Whether the Pipeline Manager's retry loop may
    /// select a sibling pipeline for this failure.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamRateLimited { .. }
                | PipelineError::UpstreamUnavailable { .. }
                | PipelineError::UpstreamTimeout { .. }
        )
    }

    /// The taxonomy kind name, stable across variant field changes; used in
    /// logging and in the client-dialect error body.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DialectTranslationFailed { .. } => "dialect_translation_failed",
            PipelineError::NoRouteAvailable { .. } => "no_route_available",
            PipelineError::CredentialMissing { .. } => "credential_missing",
            PipelineError::UpstreamBadRequest { .. } => "upstream_bad_request",
            PipelineError::UpstreamRateLimited { .. } => "upstream_rate_limited",
            PipelineError::UpstreamUnavailable { .. } => "upstream_unavailable",
            PipelineError::UpstreamTimeout { .. } => "upstream_timeout",
            PipelineError::UpstreamMalformed { .. } => "upstream_malformed",
            PipelineError::RateLimitExhausted { .. } => "rate_limit_exhausted",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::StreamCommitted { .. } => "stream_committed",
            PipelineError::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_taxonomy() {
        assert_eq!(
            PipelineError::NoRouteAvailable {
                category: "default".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            PipelineError::UpstreamRateLimited {
                provider_id: "openai".into(),
                model_id: "gpt".into(),
                base_url: "https://api.openai.com".into(),
                retry_after_secs: None,
            }
            .status_code(),
            429
        );
    }

    #[test]
    fn display_never_echoes_a_secret_looking_field() {
        let err = PipelineError::UpstreamBadRequest {
            provider_id: "openai".into(),
            model_id: "gpt".into(),
            base_url: "https://api.openai.com".into(),
            message: "invalid request".into(),
        };
        assert!(!format!("{err}").contains("sk-"));
    }

    #[test]
    fn only_upstream_transient_kinds_are_retriable() {
        assert!(
            PipelineError::UpstreamTimeout {
                provider_id: "openai".into(),
                model_id: "gpt".into(),
                elapsed_ms: 1,
            }
            .is_retriable()
        );
        assert!(
            !PipelineError::CredentialMissing {
                provider_id: "openai".into(),
                key_id: "k".into(),
            }
            .is_retriable()
        );
    }
}
