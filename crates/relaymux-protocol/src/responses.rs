//! The Responses dialect: an OpenAI `responses`-style wire shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::ChatUsage;

fn extra_is_empty(extra: &Map<String, Value>) -> bool {
    extra.is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesInputMessage {
    pub role: ResponsesRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    Message(ResponsesInputMessage),
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesTool {
    Function(ResponsesToolFunction),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesInputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(flatten, default, skip_serializing_if = "extra_is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesStatus {
    InProgress,
    Completed,
    Failed,
    Incomplete,
}

/// The terminal's finish-reason mapping: `length → max_tokens`,
/// `tool_calls → tool_calls`, otherwise passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsesFinishReason {
    Stop,
    MaxTokens,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesOutputTextContent {
    pub r#type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    Message {
        id: String,
        role: ResponsesRole,
        status: ResponsesStatus,
        content: Vec<ResponsesOutputTextContent>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: ResponsesStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    #[serde(default = "default_response_object")]
    pub object: String,
    pub created_at: i64,
    pub model: String,
    pub status: ResponsesStatus,
    #[serde(default)]
    pub output: Vec<ResponsesOutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<ResponsesFinishReason>,
}

fn default_response_object() -> String {
    "response".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

impl From<ChatUsage> for ResponsesUsage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Streaming events in the order the coalescer emits them.
/// Every variant carries the `sequence_number` the coalescer assigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    Created {
        sequence_number: u64,
        response: ResponsesCreatedBody,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        sequence_number: u64,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        sequence_number: u64,
        output_index: u32,
        item: ResponsesOutputItem,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        sequence_number: u64,
        output_index: u32,
        item_id: String,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        sequence_number: u64,
        output_index: u32,
        item_id: String,
        arguments: String,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        sequence_number: u64,
        output_index: u32,
        item: ResponsesOutputItem,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        sequence_number: u64,
        output_index: u32,
        content_index: u32,
        text: String,
    },
    #[serde(rename = "response.completed")]
    Completed {
        sequence_number: u64,
        response: ResponsesResponse,
    },
    #[serde(rename = "response.error")]
    Error {
        sequence_number: u64,
        message: String,
        r#type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesCreatedBody {
    pub id: String,
    #[serde(default = "default_response_object")]
    pub object: String,
    pub created_at: i64,
    pub model: String,
    pub status: ResponsesStatus,
}

impl ResponsesStreamEvent {
    pub fn sequence_number(&self) -> u64 {
        match self {
            ResponsesStreamEvent::Created { sequence_number, .. }
            | ResponsesStreamEvent::OutputTextDelta { sequence_number, .. }
            | ResponsesStreamEvent::OutputItemAdded { sequence_number, .. }
            | ResponsesStreamEvent::FunctionCallArgumentsDelta { sequence_number, .. }
            | ResponsesStreamEvent::FunctionCallArgumentsDone { sequence_number, .. }
            | ResponsesStreamEvent::OutputItemDone { sequence_number, .. }
            | ResponsesStreamEvent::OutputTextDone { sequence_number, .. }
            | ResponsesStreamEvent::Completed { sequence_number, .. }
            | ResponsesStreamEvent::Error { sequence_number, .. } => *sequence_number,
        }
    }

    /// The wire event name, used as the SSE `event:` line.
    pub fn event_name(&self) -> &'static str {
        match self {
            ResponsesStreamEvent::Created { .. } => "response.created",
            ResponsesStreamEvent::OutputTextDelta { .. } => "response.output_text.delta",
            ResponsesStreamEvent::OutputItemAdded { .. } => "response.output_item.added",
            ResponsesStreamEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ResponsesStreamEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ResponsesStreamEvent::OutputItemDone { .. } => "response.output_item.done",
            ResponsesStreamEvent::OutputTextDone { .. } => "response.output_text.done",
            ResponsesStreamEvent::Completed { .. } => "response.completed",
            ResponsesStreamEvent::Error { .. } => "response.error",
        }
    }
}
