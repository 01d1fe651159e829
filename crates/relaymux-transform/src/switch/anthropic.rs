//! The Anthropic Messages codec: translates to and from the canonical shape
//!.

use relaymux_protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicMessage, AnthropicRequest,
    AnthropicResponse, AnthropicRole, AnthropicStopReason, AnthropicToolDef, AnthropicUsage,
};

use crate::canonical::{
    CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalSamplingParams, CanonicalTool, CanonicalToolCall, CanonicalUsage,
};
use crate::switch::DialectTranslationFailed;

pub fn to_canonical(
    req: AnthropicRequest,
) -> Result<CanonicalRequest, DialectTranslationFailed> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = req.system {
        messages.push(CanonicalMessage {
            role: CanonicalRole::System,
            content: Some(content_to_text(system)),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }
    for msg in req.messages {
        messages.extend(message_to_canonical(msg));
    }

    Ok(CanonicalRequest {
        model: req.model,
        messages,
        tools: req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(tool_to_canonical)
            .collect(),
        tool_choice: None,
        stream_flag: req.stream.unwrap_or(false),
        sampling: CanonicalSamplingParams {
            temperature: req.temperature,
            top_p: None,
            max_tokens: Some(req.max_tokens),
        },
        metadata: Default::default(),
    })
}

fn content_to_text(content: AnthropicContent) -> String {
    match content {
        AnthropicContent::Text(s) => s,
        AnthropicContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|b| match b {
                AnthropicContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

/// Anthropic folds tool results into a user-role message with `tool_result`
/// blocks; the canonical shape keeps each as its own tool-role message, so one
/// Anthropic message can expand into several canonical ones.
fn message_to_canonical(msg: AnthropicMessage) -> Vec<CanonicalMessage> {
    let role = match msg.role {
        AnthropicRole::User => CanonicalRole::User,
        AnthropicRole::Assistant => CanonicalRole::Assistant,
    };
    match msg.content {
        AnthropicContent::Text(text) => vec![CanonicalMessage {
            role,
            content: Some(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }],
        AnthropicContent::Blocks(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut tool_results = Vec::new();
            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(CanonicalToolCall {
                            id,
                            name,
                            arguments: input.to_string(),
                        });
                    }
                    AnthropicContentBlock::ToolResult { tool_use_id, content } => {
                        tool_results.push(CanonicalMessage {
                            role: CanonicalRole::Tool,
                            content: Some(content),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_use_id),
                        });
                    }
                }
            }
            let mut out = Vec::new();
            if !text.is_empty() || !tool_calls.is_empty() {
                out.push(CanonicalMessage {
                    role,
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls,
                    tool_call_id: None,
                });
            }
            out.extend(tool_results);
            out
        }
    }
}

fn tool_to_canonical(tool: AnthropicToolDef) -> CanonicalTool {
    CanonicalTool {
        name: tool.name,
        description: tool.description,
        parameters: Some(tool.input_schema),
    }
}

pub fn from_canonical(resp: CanonicalResponse) -> AnthropicResponse {
    let choice = resp.choices.into_iter().next();
    let (content, stop_reason, usage) = match choice {
        Some(choice) => (
            content_blocks_from_message(&choice.message),
            Some(stop_reason_from_finish(choice.finish_reason)),
            resp.usage,
        ),
        None => (Vec::new(), None, resp.usage),
    };
    AnthropicResponse {
        id: resp.id,
        r#type: "message".to_string(),
        role: AnthropicRole::Assistant,
        model: resp.model,
        content,
        stop_reason,
        stop_sequence: None,
        usage: usage.map(usage_from_canonical).unwrap_or_default(),
    }
}

fn content_blocks_from_message(message: &CanonicalMessage) -> Vec<AnthropicContentBlock> {
    let mut blocks = Vec::new();
    if let Some(text) = &message.content {
        blocks.push(AnthropicContentBlock::Text { text: text.clone() });
    }
    for tool_call in &message.tool_calls {
        let input = serde_json::from_str(&tool_call.arguments)
            .unwrap_or_else(|_| serde_json::json!({}));
        blocks.push(AnthropicContentBlock::ToolUse {
            id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            input,
        });
    }
    blocks
}

fn stop_reason_from_finish(reason: CanonicalFinishReason) -> AnthropicStopReason {
    match reason {
        CanonicalFinishReason::Stop => AnthropicStopReason::EndTurn,
        CanonicalFinishReason::Length => AnthropicStopReason::MaxTokens,
        CanonicalFinishReason::ToolCalls => AnthropicStopReason::ToolUse,
        CanonicalFinishReason::ContentFilter => AnthropicStopReason::Refusal,
    }
}

fn usage_from_canonical(usage: CanonicalUsage) -> AnthropicUsage {
    AnthropicUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    }
}
