//! The Pipeline Instance: the immutable four-stage
//! assembly serving one (provider, model, credential) tuple, and the
//! `ProviderAdapter` seam its Provider stage is built from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relaymux_common::{PipelineError, PipelineHandle, RequestId};
use relaymux_transform::canonical::{CanonicalDelta, CanonicalRequest, CanonicalResponse};
use relaymux_transform::compatibility::CompatibilityPatch;
use relaymux_transform::switch::{self, ClientDialect, DialectRequest, DialectResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::{Event, EventHub, StageEvent, StagePhase, UpstreamCallEvent};
use crate::token_store::TokenStore;
use crate::vault::Secret;

/// Which of the two auth variants §4.2 names a pipeline's Provider stage
/// uses. `ApiKey` sends the Vault's bearer secret directly; `OAuth` instead
/// asks the injected `TokenStore` for an access token and retries once,
/// post-refresh, on a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthVariant {
    ApiKey,
    OAuth,
}

impl Default for AuthVariant {
    fn default() -> Self {
        AuthVariant::ApiKey
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingPolicy {
    Always,
    Never,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    Chat,
    Responses,
    Anthropic,
    Passthrough,
}

/// The Workflow stage's one decision: whether this call goes to the
/// provider as a stream. `Auto` defers to what the client asked for;
/// `Always`/`Never` override it regardless of the client's own `stream` flag
/// (still honored even in passthrough mode, per §4.6's "streaming policy
/// still applies").
fn resolve_stream(policy: StreamingPolicy, requested: bool) -> bool {
    match policy {
        StreamingPolicy::Always => true,
        StreamingPolicy::Never => false,
        StreamingPolicy::Auto => requested,
    }
}

/// The static declaration of a pipeline's stage kinds, returned by
/// `Pipeline::blueprint()`.
#[derive(Debug, Clone)]
pub struct PipelineBlueprint {
    pub switch_dialect: ClientDialect,
    pub compatibility: Vec<CompatibilityPatch>,
    pub provider_kind: String,
    pub provider_protocols: Vec<String>,
    pub streaming_policy: StreamingPolicy,
    pub process_mode: ProcessMode,
    pub base_url: String,
    /// Per-model/per-provider timeout override; `None`
    /// defers to the process-wide default the Manager carries.
    pub timeout: Option<Duration>,
    pub auth_variant: AuthVariant,
}

/// One upstream SSE chunk, raw over the wire in the provider's dialect
///.
/// Kept as a `Bytes`-bearing channel so the coalescer can decode incrementally
/// rather than require the adapter to pre-parse JSON.
pub type ByteStream = mpsc::Receiver<bytes::Bytes>;

pub enum ProviderOutcome {
    Buffered(CanonicalResponse),
    /// Raw upstream SSE bytes, not yet parsed into `CanonicalDelta`. The
    /// coalescer (`crate::coalescer`) owns that parsing.
    Stream(ByteStream),
}

pub struct ProviderCallContext {
    pub request_id: RequestId,
    pub provider_id: String,
    pub model_id: String,
    pub key_id: String,
    pub base_url: String,
    pub stream: bool,
    /// Resolved timeout for this call: the pipeline's own override, or the
    /// process-wide default the Manager was built with.
    pub timeout: Duration,
    pub auth_variant: AuthVariant,
    /// Present only for `AuthVariant::OAuth` pipelines whose Manager was
    /// built with a `TokenStore` wired in; `None` under `ApiKey`.
    pub token_store: Option<Arc<dyn TokenStore>>,
}

/// A concrete upstream HTTP exchange. Implementations
/// live in `relaymux-provider-impl`; this crate only defines the seam.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        request: CanonicalRequest,
        secret: &Secret,
        ctx: ProviderCallContext,
    ) -> Result<ProviderOutcome, PipelineError>;
}

pub struct Pipeline {
    pub handle: PipelineHandle,
    pub blueprint: PipelineBlueprint,
    pub provider: Arc<dyn ProviderAdapter>,
    events: EventHub,
    /// Shared by reference across every pipeline, like the Vault; `None`
    /// unless the deployment wired one in at `crate::config::build` time.
    token_store: Option<Arc<dyn TokenStore>>,
}

/// What a pipeline hands back to the Manager. Streaming responses are a
/// sequence of already-encoded SSE frames in the client's dialect; the
/// coalescer (for non-passthrough, streaming pipelines) or a direct
/// passthrough copy produces them.
pub enum PipelineResponse {
    Buffered(DialectResponse),
    Stream(mpsc::Receiver<bytes::Bytes>),
    /// Passthrough mode bypasses Switch/Compatibility entirely; the body is
    /// whatever bytes the provider returned, untouched.
    PassthroughBuffered(serde_json::Value),
}

impl Pipeline {
    pub fn new(
        handle: PipelineHandle,
        blueprint: PipelineBlueprint,
        provider: Arc<dyn ProviderAdapter>,
        events: EventHub,
    ) -> Self {
        Self::new_with_token_store(handle, blueprint, provider, events, None)
    }

    pub fn new_with_token_store(
        handle: PipelineHandle,
        blueprint: PipelineBlueprint,
        provider: Arc<dyn ProviderAdapter>,
        events: EventHub,
        token_store: Option<Arc<dyn TokenStore>>,
    ) -> Self {
        Self {
            handle,
            blueprint,
            provider,
            events,
            token_store,
        }
    }

    pub fn blueprint(&self) -> &PipelineBlueprint {
        &self.blueprint
    }

    /// Runs one request through the four stages in order. Streaming
    /// coalescing is performed by the caller (the Manager),
    /// which has access to the Tracker-selected retry context; this method
    /// returns the raw stage outputs it is responsible for.
    pub async fn process(
        &self,
        request: DialectRequest,
        secret: &Secret,
        request_id: RequestId,
        default_timeout: Duration,
    ) -> Result<ProviderOutcome, PipelineError> {
        if self.blueprint.process_mode == ProcessMode::Passthrough {
            return self
                .call_provider_passthrough(request, secret, request_id, default_timeout)
                .await;
        }

        self.emit_stage(request_id, "switch", StagePhase::Before).await;
        let mut canonical: CanonicalRequest =
            switch::switch_inbound(self.blueprint.switch_dialect, request)?;
        self.emit_stage(request_id, "switch", StagePhase::After).await;

        self.emit_stage(request_id, "workflow", StagePhase::Before).await;
        canonical.stream_flag = resolve_stream(self.blueprint.streaming_policy, canonical.stream_flag);
        self.emit_stage(request_id, "workflow", StagePhase::After).await;

        self.emit_stage(request_id, "compatibility", StagePhase::Before).await;
        for patch in &self.blueprint.compatibility {
            patch.apply_request(&mut canonical);
        }
        self.emit_stage(request_id, "compatibility", StagePhase::After).await;

        let stream = canonical.stream_flag;
        self.emit_stage(request_id, "provider", StagePhase::Before).await;
        let outcome = self.call_provider(canonical, secret, request_id, stream, default_timeout).await?;
        self.emit_stage(request_id, "provider", StagePhase::After).await;
        Ok(outcome)
    }

    /// The Provider stage's one HTTP exchange, wrapped with the
    /// `UpstreamCallEvent` pair the debug event bus reports timing/status
    /// through — independent of the `StageEvent` before/after pair, which
    /// only marks stage boundaries rather than the call's outcome.
    async fn call_provider(
        &self,
        canonical: CanonicalRequest,
        secret: &Secret,
        request_id: RequestId,
        stream: bool,
        default_timeout: Duration,
    ) -> Result<ProviderOutcome, PipelineError> {
        self.emit_upstream(request_id, stream, StagePhase::Before, None, None)
            .await;
        let started = Instant::now();
        let result = self
            .provider
            .call(
                canonical,
                secret,
                ProviderCallContext {
                    request_id,
                    provider_id: self.handle.provider_id.clone(),
                    model_id: self.handle.model_id.clone(),
                    key_id: self.handle.key_id.clone(),
                    base_url: self.blueprint.base_url.clone(),
                    stream,
                    timeout: self.blueprint.timeout.unwrap_or(default_timeout),
                    auth_variant: self.blueprint.auth_variant,
                    token_store: self.token_store.clone(),
                },
            )
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = result.as_ref().err().map(|err| err.status_code());
        self.emit_upstream(request_id, stream, StagePhase::After, status, Some(elapsed_ms))
            .await;
        result
    }

    async fn call_provider_passthrough(
        &self,
        request: DialectRequest,
        secret: &Secret,
        request_id: RequestId,
        default_timeout: Duration,
    ) -> Result<ProviderOutcome, PipelineError> {
        // Passthrough still needs a CanonicalRequest to cross the Provider
        // seam; build it with the client dialect's own codec so no field
        // rewriting occurs (Compatibility is skipped).
        let requested_stream = matches!(&request, DialectRequest::Chat(r) if r.stream.unwrap_or(false))
            || matches!(&request, DialectRequest::Responses(r) if r.stream.unwrap_or(false))
            || matches!(&request, DialectRequest::AnthropicMessages(r) if r.stream.unwrap_or(false));
        let stream = resolve_stream(self.blueprint.streaming_policy, requested_stream);
        let canonical = switch::switch_inbound(self.blueprint.switch_dialect, request)?;
        self.call_provider(canonical, secret, request_id, stream, default_timeout).await
    }

    /// Runs the response-direction mirror of the two stages `process` applies
    /// on the way in: Compatibility(outbound) first, then Switch(outbound)
    ///.
    pub fn switch_outbound(&self, mut response: CanonicalResponse) -> Result<DialectResponse, PipelineError> {
        for patch in &self.blueprint.compatibility {
            patch.apply_response(&mut response);
        }
        Ok(switch::switch_outbound(self.blueprint.switch_dialect, response)?)
    }

    async fn emit_stage(&self, request_id: RequestId, stage: &'static str, phase: StagePhase) {
        self.events
            .emit(Event::Stage(StageEvent {
                at: std::time::SystemTime::now(),
                request_id,
                pipeline_id: self.handle.clone(),
                stage,
                phase,
                payload_digest: String::new(),
            }))
            .await;
    }

    async fn emit_upstream(
        &self,
        request_id: RequestId,
        is_stream: bool,
        phase: StagePhase,
        status: Option<u16>,
        elapsed_ms: Option<u64>,
    ) {
        self.events
            .emit(Event::Upstream(UpstreamCallEvent {
                at: std::time::SystemTime::now(),
                request_id,
                provider_id: self.handle.provider_id.clone(),
                model_id: self.handle.model_id.clone(),
                is_stream,
                phase,
                status,
                elapsed_ms,
            }))
            .await;
    }
}

/// Per-stage timestamps recorded for the debug path. Populated only when a
/// caller opts into the client debug flag.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    pub switch: Option<(Instant, Instant)>,
    pub compatibility: Option<(Instant, Instant)>,
    pub provider: Option<(Instant, Instant)>,
}

pub fn delta_is_terminal(delta: &CanonicalDelta) -> bool {
    matches!(delta, CanonicalDelta::FinishDelta { .. } | CanonicalDelta::ErrorDelta { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_policy_defers_to_the_client_flag() {
        assert!(!resolve_stream(StreamingPolicy::Auto, false));
        assert!(resolve_stream(StreamingPolicy::Auto, true));
    }

    #[test]
    fn always_and_never_override_the_client_flag() {
        assert!(resolve_stream(StreamingPolicy::Always, false));
        assert!(!resolve_stream(StreamingPolicy::Never, true));
    }
}
