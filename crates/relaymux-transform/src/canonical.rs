//! The canonical intermediate shape the Dialect Switch translates every client
//! dialect into and out of. Conceptually a Chat-dialect
//! superset, so the Chat codec is the identity map onto this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub content: Option<String>,
    pub tool_calls: Vec<CanonicalToolCall>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalSamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    pub tools: Vec<CanonicalTool>,
    pub tool_choice: Option<Value>,
    pub stream_flag: bool,
    pub sampling: CanonicalSamplingParams,
    /// Cross-stage bookkeeping with no typed field of its own on this shape
    /// (e.g. `entryEndpoint`, a Compatibility Patch's injected toggle). The
    /// Provider Adapter flattens whatever is left here into the wire body's
    /// own `extra` bag at call time.
    pub metadata: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub index: i64,
    pub message: CanonicalMessage,
    pub finish_reason: CanonicalFinishReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub created_at: i64,
    pub model: String,
    pub choices: Vec<CanonicalChoice>,
    pub usage: Option<CanonicalUsage>,
}

/// One increment of a streaming response,. `textDelta` and
/// `toolCallDelta` may interleave; `finishDelta` is terminal.
#[derive(Debug, Clone)]
pub enum CanonicalDelta {
    TextDelta {
        content: String,
    },
    ToolCallDelta {
        index: i64,
        id: Option<String>,
        name: Option<String>,
        arguments_chunk: Option<String>,
    },
    FinishDelta {
        reason: CanonicalFinishReason,
        usage: Option<CanonicalUsage>,
    },
    ErrorDelta {
        code: String,
        message: String,
    },
}
