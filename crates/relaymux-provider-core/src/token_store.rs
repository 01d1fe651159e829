//! The out-of-scope token store seam the OAuth auth variant calls through.
//!
//! Filesystem-backed refresh-token storage and the broader OAuth
//! authorize/callback flow are explicitly out of scope (they belong to the
//! credential/OAuth token storage collaborator named in the Non-goals); this
//! module only defines the interface a `ProviderAdapter` consumes for an
//! `AuthVariant::OAuth` pipeline: fetch the current access token, and
//! refresh it once after an upstream 401. A deployment wires a concrete
//! filesystem- or vault-backed implementation in via `PipelineManager`/
//! `crate::config::build`; no implementation ships in this crate.

use async_trait::async_trait;
use relaymux_common::PipelineError;

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The current access token for (providerId, keyId), without forcing a
    /// refresh. Implementations typically cache this and only hit the
    /// network on `refresh`.
    async fn access_token(&self, provider_id: &str, key_id: &str) -> Result<String, PipelineError>;

    /// Forces a refresh and returns the new access token. Called at most
    /// once per request, after the adapter observes a 401 on the first
    /// attempt.
    async fn refresh(&self, provider_id: &str, key_id: &str) -> Result<String, PipelineError>;
}
