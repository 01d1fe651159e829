//! The Chat codec: identity map onto the canonical shape.

use relaymux_protocol::chat::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatFinishReason, ChatMessage, ChatRole, ChatTool, ChatToolCall, ChatToolCallFunction,
    ChatUsage,
};

use crate::canonical::{
    CanonicalChoice, CanonicalDelta, CanonicalFinishReason, CanonicalMessage, CanonicalRequest,
    CanonicalResponse, CanonicalRole, CanonicalSamplingParams, CanonicalTool, CanonicalToolCall,
    CanonicalUsage,
};

pub fn to_canonical(req: ChatCompletionRequest) -> CanonicalRequest {
    CanonicalRequest {
        model: req.model,
        messages: req.messages.into_iter().map(message_to_canonical).collect(),
        tools: req.tools.unwrap_or_default().into_iter().map(tool_to_canonical).collect(),
        tool_choice: req.tool_choice,
        stream_flag: req.stream.unwrap_or(false),
        sampling: CanonicalSamplingParams {
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
        },
        metadata: Default::default(),
    }
}

fn message_to_canonical(msg: ChatMessage) -> CanonicalMessage {
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

fn tool_to_canonical(tool: ChatTool) -> CanonicalTool {
    CanonicalTool {
        name: tool.function.name,
        description: tool.function.description,
        parameters: tool.function.parameters,
    }
}

pub fn from_canonical(resp: CanonicalResponse) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: resp.id,
        created: resp.created_at,
        model: resp.model,
        choices: resp.choices.into_iter().map(choice_from_canonical).collect(),
        usage: resp.usage.map(usage_from_canonical),
    }
}

fn choice_from_canonical(choice: CanonicalChoice) -> ChatCompletionChoice {
    ChatCompletionChoice {
        index: choice.index,
        message: message_from_canonical(choice.message),
        finish_reason: finish_reason_from_canonical(choice.finish_reason),
    }
}

fn message_from_canonical(msg: CanonicalMessage) -> ChatMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .into_iter()
                .map(|tc| ChatToolCall {
                    id: tc.id,
                    r#type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: tc.name,
                        arguments: tc.arguments,
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
        content: msg.content,
        tool_calls,
        tool_call_id: msg.tool_call_id,
        name: None,
        extra: Default::default(),
    }
}

pub(crate) fn finish_reason_from_canonical(reason: CanonicalFinishReason) -> ChatFinishReason {
    match reason {
        CanonicalFinishReason::Stop => ChatFinishReason::Stop,
        CanonicalFinishReason::Length => ChatFinishReason::Length,
        CanonicalFinishReason::ToolCalls => ChatFinishReason::ToolCalls,
        CanonicalFinishReason::ContentFilter => ChatFinishReason::ContentFilter,
    }
}

pub(crate) fn usage_from_canonical(usage: CanonicalUsage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn finish_reason_to_canonical(reason: ChatFinishReason) -> CanonicalFinishReason {
    match reason {
        ChatFinishReason::Stop => CanonicalFinishReason::Stop,
        ChatFinishReason::Length => CanonicalFinishReason::Length,
        ChatFinishReason::ToolCalls => CanonicalFinishReason::ToolCalls,
        ChatFinishReason::ContentFilter => CanonicalFinishReason::ContentFilter,
    }
}

fn usage_to_canonical(usage: ChatUsage) -> CanonicalUsage {
    CanonicalUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Converts one upstream Chat-dialect SSE chunk into zero or more
/// `CanonicalDelta`s. This is the reference
/// Provider Adapter's wire shape (§3, "Provider wire shape"), so the coalescer
/// drives its state machine directly from this function's output; it does not
/// need its own dialect-specific parsing.
pub fn chunk_to_deltas(chunk: &ChatCompletionChunk) -> Vec<CanonicalDelta> {
    let mut deltas = Vec::new();
    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            deltas.push(CanonicalDelta::TextDelta {
                content: content.clone(),
            });
        }
        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let (name, arguments_chunk) = match &tc.function {
                    Some(f) => (f.name.clone(), f.arguments.clone()),
                    None => (None, None),
                };
                deltas.push(CanonicalDelta::ToolCallDelta {
                    index: tc.index,
                    id: tc.id.clone(),
                    name,
                    arguments_chunk,
                });
            }
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(CanonicalDelta::FinishDelta {
                reason: finish_reason_to_canonical(reason),
                usage: chunk.usage.map(usage_to_canonical),
            });
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_user_message() {
        let req = ChatCompletionRequest {
            model: "gpt".to_string(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: Some("hi".to_string()),
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
        };
        let canonical = to_canonical(req);
        assert_eq!(canonical.messages[0].content.as_deref(), Some("hi"));
        assert!(!canonical.stream_flag);
    }

    #[test]
    fn chunk_with_text_delta_yields_one_text_delta() {
        use relaymux_protocol::chat::{ChatCompletionChunkChoice, ChatCompletionDelta};

        let chunk = ChatCompletionChunk {
            id: "c1".to_string(),
            created: 0,
            model: "gpt".to_string(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: Some("hel".to_string()),
                    refusal: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let deltas = chunk_to_deltas(&chunk);
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], CanonicalDelta::TextDelta { content } if content == "hel"));
    }

    #[test]
    fn chunk_with_finish_reason_carries_mapped_usage() {
        use relaymux_protocol::chat::{ChatCompletionChunkChoice, ChatCompletionDelta};

        let chunk = ChatCompletionChunk {
            id: "c1".to_string(),
            created: 0,
            model: "gpt".to_string(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: None,
                    refusal: None,
                    tool_calls: None,
                },
                finish_reason: Some(ChatFinishReason::Stop),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 5,
                completion_tokens: 2,
                total_tokens: 7,
            }),
        };
        let deltas = chunk_to_deltas(&chunk);
        match &deltas[0] {
            CanonicalDelta::FinishDelta { reason, usage } => {
                assert!(matches!(reason, CanonicalFinishReason::Stop));
                assert_eq!(usage.as_ref().unwrap().total_tokens, 7);
            }
            other => panic!("expected FinishDelta, got {other:?}"),
        }
    }
}
