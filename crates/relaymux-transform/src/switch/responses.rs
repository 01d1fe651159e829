//! The Responses codec: translates the OpenAI `responses`-style wire shape to
//! and from the canonical shape.

use relaymux_protocol::responses::{
    ResponsesFinishReason, ResponsesInputItem, ResponsesOutputItem, ResponsesRequest,
    ResponsesResponse, ResponsesRole, ResponsesStatus, ResponsesTool, ResponsesToolFunction,
    ResponsesOutputTextContent,
};

use crate::canonical::{
    CanonicalChoice, CanonicalFinishReason, CanonicalMessage, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalSamplingParams, CanonicalTool, CanonicalToolCall,
};
use crate::switch::DialectTranslationFailed;
use crate::switch::chat::usage_from_canonical;

pub fn to_canonical(req: ResponsesRequest) -> Result<CanonicalRequest, DialectTranslationFailed> {
    let mut messages = Vec::with_capacity(req.input.len() + 1);
    if let Some(instructions) = req.instructions {
        messages.push(CanonicalMessage {
            role: CanonicalRole::System,
            content: Some(instructions),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }
    for item in req.input {
        messages.push(input_item_to_canonical(item)?);
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
            max_tokens: None,
        },
        metadata: Default::default(),
    })
}

fn input_item_to_canonical(
    item: ResponsesInputItem,
) -> Result<CanonicalMessage, DialectTranslationFailed> {
    match item {
        ResponsesInputItem::Message(msg) => Ok(CanonicalMessage {
            role: match msg.role {
                ResponsesRole::System => CanonicalRole::System,
                ResponsesRole::User => CanonicalRole::User,
                ResponsesRole::Assistant => CanonicalRole::Assistant,
            },
            content: Some(msg.content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }),
        ResponsesInputItem::FunctionCallOutput { call_id, output } => Ok(CanonicalMessage {
            role: CanonicalRole::Tool,
            content: Some(output),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id),
        }),
    }
}

fn tool_to_canonical(tool: ResponsesTool) -> CanonicalTool {
    match tool {
        ResponsesTool::Function(f) => CanonicalTool {
            name: f.name,
            description: f.description,
            parameters: f.parameters,
        },
    }
}

pub fn from_canonical(resp: CanonicalResponse) -> ResponsesResponse {
    // §8: a terminal always reports `status=completed`, whatever the
    // upstream finish reason was; the finish reason itself is carried
    // separately through the mapped `finish_reason` field.
    let finish_reason = resp
        .choices
        .first()
        .map(|c| finish_reason_from_canonical(c.finish_reason));
    let mut output = Vec::new();
    for choice in resp.choices {
        output.extend(output_items_from_choice(choice));
    }
    ResponsesResponse {
        id: resp.id,
        object: "response".to_string(),
        created_at: resp.created_at,
        model: resp.model,
        status: ResponsesStatus::Completed,
        output,
        usage: resp.usage.map(|u| usage_from_canonical(u).into()),
        finish_reason,
    }
}

/// The finish-reason mapping §8 requires at every Responses terminal:
/// `length → max_tokens`, `tool_calls → tool_calls`, otherwise passthrough.
pub fn finish_reason_from_canonical(reason: CanonicalFinishReason) -> ResponsesFinishReason {
    match reason {
        CanonicalFinishReason::Length => ResponsesFinishReason::MaxTokens,
        CanonicalFinishReason::ToolCalls => ResponsesFinishReason::ToolCalls,
        CanonicalFinishReason::Stop => ResponsesFinishReason::Stop,
        CanonicalFinishReason::ContentFilter => ResponsesFinishReason::ContentFilter,
    }
}

fn output_items_from_choice(choice: CanonicalChoice) -> Vec<ResponsesOutputItem> {
    let mut items = Vec::new();
    let message_id = format!("msg_{}", choice.index);
    if let Some(text) = choice.message.content.clone() {
        items.push(ResponsesOutputItem::Message {
            id: message_id,
            role: ResponsesRole::Assistant,
            status: ResponsesStatus::Completed,
            content: vec![ResponsesOutputTextContent {
                r#type: "output_text".to_string(),
                text,
            }],
        });
    }
    for (n, tool_call) in choice.message.tool_calls.iter().enumerate() {
        items.push(ResponsesOutputItem::FunctionCall {
            id: format!("fc_{}_{}", choice.index, n),
            call_id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            arguments: tool_call.arguments.clone(),
            status: ResponsesStatus::Completed,
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymux_protocol::responses::ResponsesInputMessage;

    #[test]
    fn instructions_become_a_leading_system_message() {
        let req = ResponsesRequest {
            model: "gpt".to_string(),
            input: vec![ResponsesInputItem::Message(ResponsesInputMessage {
                role: ResponsesRole::User,
                content: "hi".to_string(),
            })],
            instructions: Some("be terse".to_string()),
            tools: None,
            stream: None,
            temperature: None,
            extra: Default::default(),
        };
        let canonical = to_canonical(req).unwrap();
        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, CanonicalRole::System);
    }
}
