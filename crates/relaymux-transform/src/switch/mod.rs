//! The Dialect Switch: bidirectional translation between a
//! client dialect and the canonical shape. Streaming response translation is not
//! handled here; it is delegated to the coalescer (`crate::coalescer`).

pub mod anthropic;
pub mod chat;
pub mod responses;

use relaymux_protocol::anthropic::AnthropicRequest;
use relaymux_protocol::chat::ChatCompletionRequest;
use relaymux_protocol::responses::ResponsesRequest;
use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalRequest, CanonicalResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientDialect {
    Chat,
    Responses,
    AnthropicMessages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone)]
pub struct DialectTranslationFailed {
    pub direction: TransformDirection,
    pub dialect: ClientDialect,
    pub reason: String,
}

impl std::fmt::Display for DialectTranslationFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dialect translation failed ({:?}, {:?}): {}",
            self.dialect, self.direction, self.reason
        )
    }
}

impl std::error::Error for DialectTranslationFailed {}

impl ClientDialect {
    fn as_str(self) -> &'static str {
        match self {
            ClientDialect::Chat => "chat",
            ClientDialect::Responses => "responses",
            ClientDialect::AnthropicMessages => "anthropic_messages",
        }
    }
}

impl TransformDirection {
    fn as_str(self) -> &'static str {
        match self {
            TransformDirection::Inbound => "inbound",
            TransformDirection::Outbound => "outbound",
        }
    }
}

impl From<DialectTranslationFailed> for relaymux_common::PipelineError {
    fn from(err: DialectTranslationFailed) -> Self {
        relaymux_common::PipelineError::dialect_translation_failed(
            err.direction.as_str(),
            err.dialect.as_str(),
            err.reason,
        )
    }
}

#[derive(Debug, Clone)]
pub enum DialectRequest {
    Chat(ChatCompletionRequest),
    Responses(ResponsesRequest),
    AnthropicMessages(AnthropicRequest),
}

impl DialectRequest {
    pub fn dialect(&self) -> ClientDialect {
        match self {
            DialectRequest::Chat(_) => ClientDialect::Chat,
            DialectRequest::Responses(_) => ClientDialect::Responses,
            DialectRequest::AnthropicMessages(_) => ClientDialect::AnthropicMessages,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            DialectRequest::Chat(req) => &req.model,
            DialectRequest::Responses(req) => &req.model,
            DialectRequest::AnthropicMessages(req) => &req.model,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialectResponse {
    Chat(relaymux_protocol::chat::ChatCompletionResponse),
    Responses(relaymux_protocol::responses::ResponsesResponse),
    AnthropicMessages(relaymux_protocol::anthropic::AnthropicResponse),
}

/// Translates a client-dialect request into the canonical shape. The Switch is
/// selected once at pipeline-build time from the declared dialect; it never
/// inspects the payload to choose a codec.
pub fn switch_inbound(
    dialect: ClientDialect,
    request: DialectRequest,
) -> Result<CanonicalRequest, DialectTranslationFailed> {
    match (dialect, request) {
        (ClientDialect::Chat, DialectRequest::Chat(req)) => Ok(chat::to_canonical(req)),
        (ClientDialect::Responses, DialectRequest::Responses(req)) => {
            responses::to_canonical(req)
        }
        (ClientDialect::AnthropicMessages, DialectRequest::AnthropicMessages(req)) => {
            anthropic::to_canonical(req)
        }
        (dialect, _) => Err(DialectTranslationFailed {
            direction: TransformDirection::Inbound,
            dialect,
            reason: "request body dialect does not match the pipeline's declared dialect".into(),
        }),
    }
}

/// Folds a buffered `CanonicalResponse` back into the client dialect. Used for
/// the non-streaming response direction; streaming responses go through the
/// coalescer instead.
pub fn switch_outbound(
    dialect: ClientDialect,
    response: CanonicalResponse,
) -> Result<DialectResponse, DialectTranslationFailed> {
    match dialect {
        ClientDialect::Chat => Ok(DialectResponse::Chat(chat::from_canonical(response))),
        ClientDialect::Responses => Ok(DialectResponse::Responses(responses::from_canonical(
            response,
        ))),
        ClientDialect::AnthropicMessages => Ok(DialectResponse::AnthropicMessages(
            anthropic::from_canonical(response),
        )),
    }
}
