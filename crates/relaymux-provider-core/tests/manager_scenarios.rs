//! End-to-end Manager tests against a stub Provider Adapter, covering
//! candidate failover and the no-retry dialect. Streaming/coalescing
//! behavior is covered by `coalescer.rs`'s own unit tests, which exercise the
//! same state machine without needing a full Manager/Tracker/Vault wiring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relaymux_common::{PipelineError, PipelineHandle, RequestId};
use relaymux_protocol::anthropic::{AnthropicMessage, AnthropicRequest, AnthropicRole, AnthropicContent};
use relaymux_protocol::chat::{ChatCompletionRequest, ChatMessage, ChatRole};
use relaymux_provider_core::config::{ProviderAdapterFactory, ResolvedConfig, ResolvedCredential, ResolvedPipeline, build};
use relaymux_provider_core::events::EventHub;
use relaymux_provider_core::pipeline::{
    ProcessMode, ProviderAdapter, ProviderCallContext, ProviderOutcome, StreamingPolicy,
};
use relaymux_provider_core::vault::Secret;
use relaymux_transform::canonical::{
    CanonicalChoice, CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalRole,
};
use relaymux_transform::switch::{ClientDialect, DialectRequest};

/// Always answers 429, with a `provider_id` an integration test can recognize
/// in the retry-after message to tell which pipeline was actually called.
struct RateLimitedAdapter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ProviderAdapter for RateLimitedAdapter {
    fn name(&self) -> &str {
        "rate_limited"
    }

    async fn call(
        &self,
        _request: CanonicalRequest,
        _secret: &Secret,
        ctx: ProviderCallContext,
    ) -> Result<ProviderOutcome, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::UpstreamRateLimited {
            provider_id: ctx.provider_id,
            model_id: ctx.model_id,
            base_url: ctx.base_url,
            retry_after_secs: None,
        })
    }
}

/// Always succeeds with a one-line canonical reply.
struct OkAdapter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ProviderAdapter for OkAdapter {
    fn name(&self) -> &str {
        "ok"
    }

    async fn call(
        &self,
        request: CanonicalRequest,
        _secret: &Secret,
        _ctx: ProviderCallContext,
    ) -> Result<ProviderOutcome, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderOutcome::Buffered(CanonicalResponse {
            id: "resp-1".into(),
            created_at: 0,
            model: request.model,
            choices: vec![CanonicalChoice {
                index: 0,
                message: CanonicalMessage {
                    role: CanonicalRole::Assistant,
                    content: Some("ok".into()),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                },
                finish_reason: CanonicalFinishReason::Stop,
            }],
            usage: None,
        }))
    }
}

/// Dispatches each pipeline's `provider_kind` to the pre-built adapter the
/// test registered it under, instead of a real vendor registry.
struct FixedFactory {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderAdapterFactory for FixedFactory {
    fn build(&self, provider_kind: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_kind).cloned()
    }
}

fn handle(key_id: &str) -> PipelineHandle {
    PipelineHandle::new("openai", "gpt-4o", key_id)
}

fn chat_pipeline(key_id: &str, kind: &str) -> ResolvedPipeline {
    ResolvedPipeline {
        handle: handle(key_id),
        base_url: "https://api.example.com".into(),
        switch_dialect: ClientDialect::Chat,
        compatibility: Vec::new(),
        provider_kind: kind.into(),
        provider_protocols: vec!["chat".into()],
        streaming_policy: StreamingPolicy::Never,
        process_mode: ProcessMode::Chat,
        timeout_ms: None,
        auth_variant: Default::default(),
    }
}

fn chat_request() -> DialectRequest {
    DialectRequest::Chat(ChatCompletionRequest {
        model: "gpt-4o".into(),
        messages: vec![ChatMessage {
            role: ChatRole::User,
            content: Some("hi".into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            extra: Default::default(),
        }],
        tools: None,
        tool_choice: None,
        stream: Some(false),
        temperature: None,
        top_p: None,
        max_tokens: None,
        extra: Default::default(),
    })
}

/// Scenario C: a 429 on the first candidate excludes it
/// and retries against the next; the fingerprint's penalty count stays below
/// the blacklist threshold so it isn't degraded.
#[tokio::test]
async fn failover_moves_to_the_next_candidate_after_a_429() {
    let rate_limited_calls = Arc::new(AtomicUsize::new(0));
    let ok_calls = Arc::new(AtomicUsize::new(0));

    let mut resolved = ResolvedConfig::default();
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "openai".into(),
        key_id: "key-a".into(),
        secret: "sk-a".into(),
    });
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "openai".into(),
        key_id: "key-b".into(),
        secret: "sk-b".into(),
    });
    resolved.pipelines.push(chat_pipeline("key-a", "flaky"));
    resolved.pipelines.push(chat_pipeline("key-b", "reliable"));
    resolved
        .route_pools
        .insert("default".into(), vec![handle("key-a"), handle("key-b")]);
    resolved.tracker.blacklist_threshold = 3;

    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(
        "flaky".into(),
        Arc::new(RateLimitedAdapter {
            calls: rate_limited_calls.clone(),
        }),
    );
    adapters.insert("reliable".into(), Arc::new(OkAdapter { calls: ok_calls.clone() }));
    let factory = FixedFactory { adapters };

    let manager = build(resolved, EventHub::new(16), &factory).unwrap();
    let response = manager
        .dispatch("default", chat_request(), RequestId::new())
        .await
        .expect("the second candidate should serve the request");

    assert!(matches!(
        response,
        relaymux_provider_core::pipeline::PipelineResponse::Buffered(_)
    ));
    assert_eq!(rate_limited_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
}

/// Scenario D: the Anthropic dialect never retries past
/// its first 429, even though the route pool has a second healthy candidate.
#[tokio::test]
async fn anthropic_dialect_never_retries_past_the_first_429() {
    let rate_limited_calls = Arc::new(AtomicUsize::new(0));
    let ok_calls = Arc::new(AtomicUsize::new(0));

    let mut resolved = ResolvedConfig::default();
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "anthropic".into(),
        key_id: "key-a".into(),
        secret: "sk-a".into(),
    });
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "anthropic".into(),
        key_id: "key-b".into(),
        secret: "sk-b".into(),
    });
    let mut first = chat_pipeline("key-a", "flaky");
    first.handle.provider_id = "anthropic".into();
    first.switch_dialect = ClientDialect::AnthropicMessages;
    first.process_mode = ProcessMode::Anthropic;
    let mut second = chat_pipeline("key-b", "reliable");
    second.handle.provider_id = "anthropic".into();
    second.switch_dialect = ClientDialect::AnthropicMessages;
    second.process_mode = ProcessMode::Anthropic;

    let first_handle = first.handle.clone();
    let second_handle = second.handle.clone();
    resolved.pipelines.push(first);
    resolved.pipelines.push(second);
    resolved
        .route_pools
        .insert("default".into(), vec![first_handle, second_handle]);

    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(
        "flaky".into(),
        Arc::new(RateLimitedAdapter {
            calls: rate_limited_calls.clone(),
        }),
    );
    adapters.insert("reliable".into(), Arc::new(OkAdapter { calls: ok_calls.clone() }));
    let factory = FixedFactory { adapters };

    let manager = build(resolved, EventHub::new(16), &factory).unwrap();
    let request = DialectRequest::AnthropicMessages(AnthropicRequest {
        model: "claude-3".into(),
        max_tokens: 64,
        messages: vec![AnthropicMessage {
            role: AnthropicRole::User,
            content: AnthropicContent::Text("hi".into()),
        }],
        system: None,
        tools: None,
        stream: Some(false),
        temperature: None,
        extra: Default::default(),
    });

    let err = manager
        .dispatch("default", request, RequestId::new())
        .await
        .expect_err("a 429 on the first Anthropic candidate must not be retried");

    match &err {
        PipelineError::RateLimitExhausted { attempts, .. } => assert_eq!(*attempts, 1),
        other => panic!("expected RateLimitExhausted, got {other:?}"),
    }
    assert_eq!(rate_limited_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ok_calls.load(Ordering::SeqCst), 0);
}

/// When every candidate in the pool 429s, the retry budget runs out and the
/// dispatch fails with the aggregated `RateLimitExhausted`, not a bare
/// `UpstreamRateLimited` from whichever candidate happened to run last.
#[tokio::test]
async fn exhausting_the_retry_budget_on_429s_reports_rate_limit_exhausted() {
    let rate_limited_calls = Arc::new(AtomicUsize::new(0));

    let mut resolved = ResolvedConfig::default();
    resolved.manager.retry_budget = 2;
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "openai".into(),
        key_id: "key-a".into(),
        secret: "sk-a".into(),
    });
    resolved.key_vault.push(ResolvedCredential {
        provider_id: "openai".into(),
        key_id: "key-b".into(),
        secret: "sk-b".into(),
    });
    resolved.pipelines.push(chat_pipeline("key-a", "flaky"));
    resolved.pipelines.push(chat_pipeline("key-b", "flaky"));
    resolved
        .route_pools
        .insert("default".into(), vec![handle("key-a"), handle("key-b")]);
    resolved.tracker.blacklist_threshold = 100;

    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(
        "flaky".into(),
        Arc::new(RateLimitedAdapter {
            calls: rate_limited_calls.clone(),
        }),
    );
    let factory = FixedFactory { adapters };

    let manager = build(resolved, EventHub::new(16), &factory).unwrap();
    let err = manager
        .dispatch("default", chat_request(), RequestId::new())
        .await
        .expect_err("every candidate 429s, so the budget runs out");

    match &err {
        PipelineError::RateLimitExhausted { attempts, excluded, .. } => {
            assert_eq!(*attempts, 2);
            assert_eq!(excluded.len(), 2);
        }
        other => panic!("expected RateLimitExhausted, got {other:?}"),
    }
    assert_eq!(rate_limited_calls.load(Ordering::SeqCst), 2);
}

/// An unknown route category fails fast with `PipelineError::NoRouteAvailable`-
/// shaped routing error rather than panicking or silently picking a default.
#[tokio::test]
async fn dispatch_to_an_unknown_route_fails_with_route_not_found() {
    let resolved = ResolvedConfig::default();
    let factory = FixedFactory {
        adapters: HashMap::new(),
    };
    let manager = build(resolved, EventHub::new(16), &factory).unwrap();

    let err = manager
        .dispatch("missing", chat_request(), RequestId::new())
        .await
        .expect_err("an unconfigured route must fail");
    assert_eq!(err.kind(), "no_route_available");
}
