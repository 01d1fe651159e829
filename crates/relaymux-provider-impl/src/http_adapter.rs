//! The reference `ProviderAdapter`: always speaks Chat on the wire, one HTTP
//! exchange against an OpenAI-Chat-Completions-shaped upstream, streamed or
//! buffered.
//!
//! Grounded on the shared-client cache (`client.rs`, itself adapted
//! from `providers/http_client.rs`) and the bearer-header setup in
//! `auth.rs`/`auth_extractor.rs`, but collapsed from per-vendor providers
//! (OpenAI, Claude, Gemini, Vertex, ...) each with its own wire shape and
//! OAuth flow down to the one kind this runtime actually dispatches onto: the
//! Switch and Compatibility Patch stages have already normalized everything
//! onto the canonical shape and a single Chat wire shape before this adapter
//! ever runs, so per-vendor request/response translation has moved upstream
//! into `relaymux-transform`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use relaymux_common::PipelineError;
use relaymux_protocol::chat::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatFinishReason,
    ChatMessage, ChatRole, ChatTool, ChatToolCall, ChatToolCallFunction, ChatUsage,
};
use relaymux_provider_core::{
    AuthVariant, ProviderAdapter, ProviderCallContext, ProviderOutcome, Secret,
};
use relaymux_transform::canonical::{
    CanonicalChoice, CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalTool, CanonicalToolCall, CanonicalUsage,
};
use tokio::sync::mpsc;

use crate::auth;
use crate::client;

/// Channel depth for the raw-SSE-bytes relay from the upstream response body
/// to the coalescer. Deliberately small: backpressure here should propagate
/// to the upstream socket rather than buffer unboundedly.
const STREAM_CHANNEL_DEPTH: usize = 64;

pub struct HttpChatProviderAdapter {
    proxy: Option<String>,
    user_agent: String,
}

impl HttpChatProviderAdapter {
    pub fn new(proxy: Option<String>, user_agent: impl Into<String>) -> Self {
        Self {
            proxy,
            user_agent: user_agent.into(),
        }
    }
}

impl Default for HttpChatProviderAdapter {
    fn default() -> Self {
        Self::new(None, "relaymux/1")
    }
}

impl HttpChatProviderAdapter {
    /// `ApiKey` sends the Vault's bearer secret as-is; `OAuth` asks the
    /// injected `TokenStore` for the current access token instead. A
    /// pipeline declaring `OAuth` with no store wired is a configuration
    /// fault, not a retriable condition.
    async fn resolve_bearer(
        &self,
        secret: &Secret,
        ctx: &ProviderCallContext,
    ) -> Result<String, PipelineError> {
        match ctx.auth_variant {
            AuthVariant::ApiKey => Ok(secret.expose().to_string()),
            AuthVariant::OAuth => {
                let store = ctx.token_store.as_ref().ok_or_else(|| {
                    PipelineError::internal(format!(
                        "pipeline for {}/{} declares the oauth auth variant but no TokenStore was wired into build()",
                        ctx.provider_id, ctx.model_id
                    ))
                })?;
                store.access_token(&ctx.provider_id, &ctx.key_id).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_once(
        &self,
        client: &wreq::Client,
        url: &str,
        wire_request: &ChatCompletionRequest,
        bearer: &str,
        timeout: std::time::Duration,
        ctx: &ProviderCallContext,
        started: std::time::Instant,
    ) -> Result<wreq::Response, PipelineError> {
        let mut headers = Vec::new();
        auth::set_bearer(&mut headers, bearer);
        auth::set_content_type_json(&mut headers);
        auth::set_user_agent(&mut headers, &self.user_agent);

        let mut builder = client.post(url).json(wire_request);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        match tokio::time::timeout(timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(PipelineError::UpstreamUnavailable {
                provider_id: ctx.provider_id.clone(),
                model_id: ctx.model_id.clone(),
                base_url: ctx.base_url.clone(),
                reason: err.to_string(),
            }),
            Err(_) => Err(PipelineError::UpstreamTimeout {
                provider_id: ctx.provider_id.clone(),
                model_id: ctx.model_id.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpChatProviderAdapter {
    fn name(&self) -> &str {
        "http_chat"
    }

    async fn call(
        &self,
        request: CanonicalRequest,
        secret: &Secret,
        ctx: ProviderCallContext,
    ) -> Result<ProviderOutcome, PipelineError> {
        let client = client::shared_client(self.proxy.as_deref())?;
        let wire_request = chat_request_from_canonical(&request, ctx.stream);
        let url = format!("{}/chat/completions", ctx.base_url.trim_end_matches('/'));

        let mut bearer = self.resolve_bearer(secret, &ctx).await?;
        let started = std::time::Instant::now();
        let mut response =
            self.send_once(&client, &url, &wire_request, &bearer, ctx.timeout, &ctx, started)
                .await?;

        // §4.2: the OAuth auth variant retries the exchange at most once,
        // after a fresh refresh, on a 401. The ApiKey variant never retries
        // here — a bad bearer secret is a standing `UpstreamBadRequest`, not
        // a transient condition.
        if response.status().as_u16() == 401 && ctx.auth_variant == AuthVariant::OAuth {
            if let Some(store) = ctx.token_store.as_ref() {
                bearer = store
                    .refresh(&ctx.provider_id, &ctx.key_id)
                    .await?;
                response = self
                    .send_once(&client, &url, &wire_request, &bearer, ctx.timeout, &ctx, started)
                    .await?;
            }
        }

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(PipelineError::UpstreamRateLimited {
                provider_id: ctx.provider_id,
                model_id: ctx.model_id,
                base_url: ctx.base_url,
                retry_after_secs,
            });
        }
        if status.is_server_error() {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| "no body".to_string());
            return Err(PipelineError::UpstreamUnavailable {
                provider_id: ctx.provider_id,
                model_id: ctx.model_id,
                base_url: ctx.base_url,
                reason,
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no body".to_string());
            return Err(PipelineError::UpstreamBadRequest {
                provider_id: ctx.provider_id,
                model_id: ctx.model_id,
                base_url: ctx.base_url,
                message,
            });
        }

        if ctx.stream {
            let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH);
            let mut body = response.bytes_stream();
            tokio::spawn(async move {
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            if tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
            Ok(ProviderOutcome::Stream(rx))
        } else {
            let body: ChatCompletionResponse = response.json().await.map_err(|err| {
                PipelineError::UpstreamMalformed {
                    provider_id: ctx.provider_id.clone(),
                    model_id: ctx.model_id.clone(),
                    reason: err.to_string(),
                }
            })?;
            Ok(ProviderOutcome::Buffered(chat_response_to_canonical(body)))
        }
    }
}

/// The outbound half of the wire mapping: a canonical request onto the Chat
/// wire shape. Mirrors `relaymux_transform::switch::chat::to_canonical` in
/// reverse; kept here rather than in the transform crate because the wire
/// shape is a property of the adapter's upstream, not of the client dialect.
fn chat_request_from_canonical(req: &CanonicalRequest, stream: bool) -> ChatCompletionRequest {
    // Compatibility patches (`ThinkingFlag`, `FieldRename`) write their
    // vendor-specific payload into `CanonicalRequest::metadata`; this is
    // where that bag finally reaches the wire, flattened into the body
    // alongside whatever the upstream never defines a typed field for.
    let mut extra = serde_json::Map::new();
    for (key, value) in &req.metadata {
        extra.insert(key.clone(), serde_json::Value::String(value.clone()));
    }
    ChatCompletionRequest {
        model: req.model.clone(),
        messages: req.messages.iter().map(chat_message_from_canonical).collect(),
        tools: if req.tools.is_empty() {
            None
        } else {
            Some(req.tools.iter().map(chat_tool_from_canonical).collect())
        },
        tool_choice: req.tool_choice.clone(),
        stream: Some(stream),
        temperature: req.sampling.temperature,
        top_p: req.sampling.top_p,
        max_tokens: req.sampling.max_tokens,
        extra,
    }
}

fn chat_message_from_canonical(msg: &CanonicalMessage) -> ChatMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .iter()
                .map(|tc| ChatToolCall {
                    id: tc.id.clone(),
                    r#type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
        )
    };
    ChatMessage {
        role: match msg.role {
            CanonicalRole::System => ChatRole::System,
            CanonicalRole::User => ChatRole::User,
            CanonicalRole::Assistant => ChatRole::Assistant,
            CanonicalRole::Tool => ChatRole::Tool,
        },
        content: msg.content.clone(),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
        name: None,
        extra: Default::default(),
    }
}

fn chat_tool_from_canonical(tool: &CanonicalTool) -> ChatTool {
    ChatTool {
        r#type: "function".to_string(),
        function: relaymux_protocol::chat::ChatFunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// The inbound half: a buffered Chat-wire response onto the canonical shape.
/// Mirrors `relaymux_transform::switch::chat::from_canonical` in reverse.
fn chat_response_to_canonical(resp: ChatCompletionResponse) -> CanonicalResponse {
    CanonicalResponse {
        id: resp.id,
        created_at: resp.created,
        model: resp.model,
        choices: resp.choices.into_iter().map(chat_choice_to_canonical).collect(),
        usage: resp.usage.map(chat_usage_to_canonical),
    }
}

fn chat_choice_to_canonical(choice: ChatCompletionChoice) -> CanonicalChoice {
    CanonicalChoice {
        index: choice.index,
        message: chat_message_to_canonical(choice.message),
        finish_reason: chat_finish_reason_to_canonical(choice.finish_reason),
    }
}

fn chat_message_to_canonical(msg: ChatMessage) -> CanonicalMessage {
    CanonicalMessage {
        role: match msg.role {
            ChatRole::System => CanonicalRole::System,
            ChatRole::User => CanonicalRole::User,
            ChatRole::Assistant => CanonicalRole::Assistant,
            ChatRole::Tool => CanonicalRole::Tool,
        },
        content: msg.content,
        tool_calls: msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| CanonicalToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect(),
        tool_call_id: msg.tool_call_id,
    }
}

fn chat_finish_reason_to_canonical(reason: ChatFinishReason) -> CanonicalFinishReason {
    match reason {
        ChatFinishReason::Stop => CanonicalFinishReason::Stop,
        ChatFinishReason::Length => CanonicalFinishReason::Length,
        ChatFinishReason::ToolCalls => CanonicalFinishReason::ToolCalls,
        ChatFinishReason::ContentFilter => CanonicalFinishReason::ContentFilter,
    }
}

fn chat_usage_to_canonical(usage: ChatUsage) -> CanonicalUsage {
    CanonicalUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymux_common::RequestId;
    use relaymux_provider_core::{CredentialVault, TokenStore};
    use relaymux_transform::canonical::CanonicalSamplingParams;
    use std::sync::Arc;

    fn sample_ctx(auth_variant: AuthVariant, token_store: Option<Arc<dyn TokenStore>>) -> ProviderCallContext {
        ProviderCallContext {
            request_id: RequestId::new(),
            provider_id: "openai".to_string(),
            model_id: "gpt-4o".to_string(),
            key_id: "key-a".to_string(),
            base_url: "https://api.example.com".to_string(),
            stream: false,
            timeout: std::time::Duration::from_secs(5),
            auth_variant,
            token_store,
        }
    }

    struct StubTokenStore {
        token: String,
        refreshed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl TokenStore for StubTokenStore {
        async fn access_token(&self, _provider_id: &str, _key_id: &str) -> Result<String, PipelineError> {
            Ok(self.token.clone())
        }

        async fn refresh(&self, _provider_id: &str, _key_id: &str) -> Result<String, PipelineError> {
            self.refreshed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(format!("{}-refreshed", self.token))
        }
    }

    #[tokio::test]
    async fn api_key_variant_sends_the_vault_secret_directly() {
        let vault = CredentialVault::builder()
            .insert("openai", "key-a", "sk-test")
            .build();
        let secret = vault.resolve("openai", "key-a").unwrap();
        let adapter = HttpChatProviderAdapter::default();
        let ctx = sample_ctx(AuthVariant::ApiKey, None);
        let bearer = adapter.resolve_bearer(secret, &ctx).await.unwrap();
        assert_eq!(bearer, "sk-test");
    }

    #[tokio::test]
    async fn oauth_variant_asks_the_token_store_instead_of_the_vault() {
        // An OAuth pipeline's vault entry is never read for its bearer
        // value; the access token comes from the TokenStore seam instead.
        let vault = CredentialVault::builder().insert("openai", "key-a", "unused").build();
        let secret = vault.resolve("openai", "key-a").unwrap();

        let store: Arc<dyn TokenStore> = Arc::new(StubTokenStore {
            token: "access-1".to_string(),
            refreshed: std::sync::atomic::AtomicBool::new(false),
        });
        let adapter = HttpChatProviderAdapter::default();
        let ctx = sample_ctx(AuthVariant::OAuth, Some(store));
        let bearer = adapter.resolve_bearer(secret, &ctx).await.unwrap();
        assert_eq!(bearer, "access-1");
    }

    #[tokio::test]
    async fn oauth_variant_without_a_wired_token_store_fails_closed() {
        let vault = CredentialVault::builder().insert("openai", "key-a", "unused").build();
        let secret = vault.resolve("openai", "key-a").unwrap();
        let adapter = HttpChatProviderAdapter::default();
        let ctx = sample_ctx(AuthVariant::OAuth, None);
        let err = adapter.resolve_bearer(secret, &ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Internal { .. }));
    }

    #[test]
    fn request_mapping_carries_the_model_and_messages() {
        let req = CanonicalRequest {
            model: "gpt-4o".to_string(),
            messages: vec![CanonicalMessage {
                role: CanonicalRole::User,
                content: Some("hi".to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
            tools: Vec::new(),
            tool_choice: None,
            stream_flag: false,
            sampling: CanonicalSamplingParams::default(),
            metadata: Default::default(),
        };
        let wire = chat_request_from_canonical(&req, true);
        assert_eq!(wire.model, "gpt-4o");
        assert_eq!(wire.stream, Some(true));
        assert_eq!(wire.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn compatibility_metadata_reaches_the_wire_bodys_extra_bag() {
        let mut req = CanonicalRequest {
            model: "claude-3".to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
            stream_flag: false,
            sampling: CanonicalSamplingParams::default(),
            metadata: Default::default(),
        };
        req.metadata.insert("thinking".to_string(), "enabled".to_string());
        let wire = chat_request_from_canonical(&req, false);
        assert_eq!(
            wire.extra.get("thinking").and_then(|v| v.as_str()),
            Some("enabled")
        );
    }

    #[test]
    fn response_mapping_round_trips_usage() {
        let resp = ChatCompletionResponse {
            id: "chatcmpl-1".to_string(),
            created: 10,
            model: "gpt-4o".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: Some("hello".to_string()),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                    extra: Default::default(),
                },
                finish_reason: ChatFinishReason::Stop,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 3,
                completion_tokens: 4,
                total_tokens: 7,
            }),
        };
        let canonical = chat_response_to_canonical(resp);
        assert_eq!(canonical.usage.unwrap().total_tokens, 7);
        assert_eq!(canonical.choices[0].message.content.as_deref(), Some("hello"));
    }
}
