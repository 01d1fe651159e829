//! The Streaming Coalescer: consumes raw upstream SSE
//! bytes in the Chat dialect and emits client-dialect SSE frames.
//!
//! Split into two layers, mirroring a stream decoder plus a heartbeat-wrapped
//! SSE relay: a pure state machine (`Coalescer`) that turns deltas into typed
//! events, and an async driver (`spawn_coalescer`) that owns the upstream
//! channel, the text window timer, and the output channel.

use std::time::Duration;

use bytes::Bytes;
use relaymux_protocol::anthropic::{
    AnthropicContentBlock, AnthropicContentDelta, AnthropicMessageDeltaBody,
    AnthropicMessageStart, AnthropicStopReason, AnthropicStreamError, AnthropicStreamEvent,
    AnthropicUsage,
};
use relaymux_protocol::chat::ChatCompletionChunk;
use relaymux_protocol::responses::{
    ResponsesCreatedBody, ResponsesOutputItem, ResponsesResponse, ResponsesStatus,
    ResponsesStreamEvent, ResponsesUsage,
};
use relaymux_protocol::{SseParser, encode_event};
use relaymux_transform::canonical::{CanonicalDelta, CanonicalFinishReason, CanonicalUsage};
use relaymux_transform::switch::ClientDialect;
use relaymux_transform::switch::chat::chunk_to_deltas;
use relaymux_transform::switch::responses::finish_reason_from_canonical;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolCallPhase {
    NotStarted,
    Added,
    Accumulating,
    Done,
}

#[derive(Debug, Clone)]
struct ToolCallTrack {
    upstream_index: i64,
    id: String,
    name: String,
    arguments: String,
    output_index: u32,
    block_index: u32,
    phase: ToolCallPhase,
}

/// Events a `Coalescer` emits, one dialect-shaped event at a time.
#[derive(Debug, Clone)]
pub enum CoalescedEvent {
    Responses(ResponsesStreamEvent),
    Anthropic(AnthropicStreamEvent),
    Chat(ChatCompletionChunk),
}

impl CoalescedEvent {
    /// Encodes one event as an `event: <name>\ndata: <json>\n\n` SSE frame
    ///.
    pub fn encode(&self) -> Option<String> {
        match self {
            CoalescedEvent::Responses(event) => {
                let data = serde_json::to_string(event).ok()?;
                Some(encode_event(Some(event.event_name()), &data))
            }
            CoalescedEvent::Anthropic(event) => {
                let data = serde_json::to_string(event).ok()?;
                Some(encode_event(Some(event.event_name()), &data))
            }
            CoalescedEvent::Chat(chunk) => {
                let data = serde_json::to_string(chunk).ok()?;
                Some(encode_event(None, &data))
            }
        }
    }
}

/// Per-stream coalescing state. One instance serves exactly one stream
///.
pub struct Coalescer {
    dialect: ClientDialect,
    model: String,
    sequence_number: u64,
    response_id: Option<String>,
    created_at: Option<i64>,
    text_output_index: Option<u32>,
    anthropic_text_block: Option<u32>,
    next_output_index: u32,
    pending_text: String,
    accumulated_text: String,
    tool_calls: Vec<ToolCallTrack>,
    finish_reason: Option<CanonicalFinishReason>,
    usage: Option<CanonicalUsage>,
    done: bool,
}

impl Coalescer {
    pub fn new(dialect: ClientDialect, model: String) -> Self {
        Self {
            dialect,
            model,
            sequence_number: 0,
            response_id: None,
            created_at: None,
            text_output_index: None,
            anthropic_text_block: None,
            next_output_index: 0,
            pending_text: String::new(),
            accumulated_text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
            done: false,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence_number;
        self.sequence_number += 1;
        seq
    }

    /// Ingests one upstream Chat-dialect chunk. Returns events ready to emit
    /// immediately (everything except buffered text, which waits for the
    /// coalescing window — see `flush_text`).
    pub fn ingest_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<CoalescedEvent> {
        if self.done {
            return Vec::new();
        }

        if self.dialect == ClientDialect::Chat {
            // Identity transform: the wire shape already matches, so the
            // chunk passes through untouched.
            return vec![CoalescedEvent::Chat(chunk)];
        }

        let mut events = Vec::new();
        if self.response_id.is_none() {
            self.response_id = Some(chunk.id.clone());
            self.created_at = Some(chunk.created);
            match self.dialect {
                ClientDialect::Responses => events.push(self.emit_responses_created()),
                ClientDialect::AnthropicMessages => events.push(self.emit_anthropic_message_start()),
                ClientDialect::Chat => {}
            }
        }

        for delta in chunk_to_deltas(&chunk) {
            events.extend(self.handle_delta(delta));
        }
        events
    }

    fn handle_delta(&mut self, delta: CanonicalDelta) -> Vec<CoalescedEvent> {
        match delta {
            CanonicalDelta::TextDelta { content } => {
                self.pending_text.push_str(&content);
                self.accumulated_text.push_str(&content);
                Vec::new()
            }
            CanonicalDelta::ToolCallDelta {
                index,
                id,
                name,
                arguments_chunk,
            } => self.handle_tool_call_delta(index, id, name, arguments_chunk),
            CanonicalDelta::FinishDelta { reason, usage } => {
                self.finish_reason = Some(reason);
                self.usage = usage;
                Vec::new()
            }
            CanonicalDelta::ErrorDelta { code, message } => self.emit_error(code, message),
        }
    }

    fn handle_tool_call_delta(
        &mut self,
        upstream_index: i64,
        id: Option<String>,
        name: Option<String>,
        arguments_chunk: Option<String>,
    ) -> Vec<CoalescedEvent> {
        let mut events = Vec::new();
        let slot = self
            .tool_calls
            .iter()
            .position(|t| t.upstream_index == upstream_index);
        let slot = slot.unwrap_or_else(|| {
            self.tool_calls.push(ToolCallTrack {
                upstream_index,
                id: id.clone().unwrap_or_else(|| format!("call_{upstream_index}")),
                name: String::new(),
                arguments: String::new(),
                output_index: 0,
                block_index: 0,
                phase: ToolCallPhase::NotStarted,
            });
            self.tool_calls.len() - 1
        });

        let name_arrived = name.is_some();
        if let Some(name) = name {
            self.tool_calls[slot].name = name;
        }

        // Added must precede the first delta even when arguments arrive
        // before a name does.
        if self.tool_calls[slot].phase == ToolCallPhase::NotStarted
            && (name_arrived || arguments_chunk.is_some())
        {
            let track = &mut self.tool_calls[slot];
            track.output_index = self.next_output_index;
            self.next_output_index += 1;
            track.phase = ToolCallPhase::Added;
            events.push(self.emit_tool_call_added(slot));
        }

        if let Some(chunk) = arguments_chunk {
            let track = &mut self.tool_calls[slot];
            track.arguments.push_str(&chunk);
            track.phase = ToolCallPhase::Accumulating;
            events.push(self.emit_tool_call_arguments_delta(slot, &chunk));
        }

        events
    }

    fn emit_responses_created(&mut self) -> CoalescedEvent {
        let seq = self.next_sequence();
        CoalescedEvent::Responses(ResponsesStreamEvent::Created {
            sequence_number: seq,
            response: ResponsesCreatedBody {
                id: self.response_id.clone().unwrap_or_default(),
                object: "response".to_string(),
                created_at: self.created_at.unwrap_or_default(),
                model: self.model.clone(),
                status: ResponsesStatus::InProgress,
            },
        })
    }

    fn emit_anthropic_message_start(&mut self) -> CoalescedEvent {
        self.next_sequence();
        CoalescedEvent::Anthropic(AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart {
                id: self.response_id.clone().unwrap_or_default(),
                r#type: "message".to_string(),
                role: relaymux_protocol::anthropic::AnthropicRole::Assistant,
                model: self.model.clone(),
                content: Vec::new(),
                usage: AnthropicUsage::default(),
            },
        })
    }

    fn emit_tool_call_added(&mut self, slot: usize) -> CoalescedEvent {
        match self.dialect {
            ClientDialect::Responses => {
                let seq = self.next_sequence();
                let track = &self.tool_calls[slot];
                CoalescedEvent::Responses(ResponsesStreamEvent::OutputItemAdded {
                    sequence_number: seq,
                    output_index: track.output_index,
                    item: ResponsesOutputItem::FunctionCall {
                        id: format!("fc_{}", track.output_index),
                        call_id: track.id.clone(),
                        name: track.name.clone(),
                        arguments: String::new(),
                        status: ResponsesStatus::InProgress,
                    },
                })
            }
            ClientDialect::AnthropicMessages => {
                let block_index = self.reserve_block_index();
                let track = &mut self.tool_calls[slot];
                track.block_index = block_index;
                CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStart {
                    index: block_index,
                    content_block: AnthropicContentBlock::ToolUse {
                        id: track.id.clone(),
                        name: track.name.clone(),
                        input: serde_json::json!({}),
                    },
                })
            }
            ClientDialect::Chat => unreachable!("identity path returns before delta handling"),
        }
    }

    fn emit_tool_call_arguments_delta(&mut self, slot: usize, chunk: &str) -> CoalescedEvent {
        match self.dialect {
            ClientDialect::Responses => {
                let seq = self.next_sequence();
                let track = &self.tool_calls[slot];
                CoalescedEvent::Responses(ResponsesStreamEvent::FunctionCallArgumentsDelta {
                    sequence_number: seq,
                    output_index: track.output_index,
                    item_id: format!("fc_{}", track.output_index),
                    delta: chunk.to_string(),
                })
            }
            ClientDialect::AnthropicMessages => {
                let track = &self.tool_calls[slot];
                CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockDelta {
                    index: track.block_index,
                    delta: AnthropicContentDelta::InputJsonDelta {
                        partial_json: chunk.to_string(),
                    },
                })
            }
            ClientDialect::Chat => unreachable!("identity path returns before delta handling"),
        }
    }

    fn reserve_block_index(&mut self) -> u32 {
        let idx = self.next_output_index;
        self.next_output_index += 1;
        idx
    }

    /// Flushes the buffered text window, emitting at most one text-delta
    /// event. Text is coalesced across a configurable time window rather than
    /// forwarded delta-by-delta.
    pub fn flush_text(&mut self) -> Vec<CoalescedEvent> {
        if self.pending_text.is_empty() || self.done {
            return Vec::new();
        }
        let text = std::mem::take(&mut self.pending_text);
        match self.dialect {
            ClientDialect::Responses => {
                if self.text_output_index.is_none() {
                    self.text_output_index = Some(self.next_output_index);
                    self.next_output_index += 1;
                }
                let output_index = self.text_output_index.unwrap();
                let seq = self.next_sequence();
                vec![CoalescedEvent::Responses(ResponsesStreamEvent::OutputTextDelta {
                    sequence_number: seq,
                    output_index,
                    content_index: 0,
                    delta: text,
                })]
            }
            ClientDialect::AnthropicMessages => {
                let mut events = Vec::new();
                if self.anthropic_text_block.is_none() {
                    let index = self.reserve_block_index();
                    self.anthropic_text_block = Some(index);
                    events.push(CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStart {
                        index,
                        content_block: AnthropicContentBlock::Text {
                            text: String::new(),
                        },
                    }));
                }
                let index = self.anthropic_text_block.unwrap();
                events.push(CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicContentDelta::TextDelta { text },
                }));
                events
            }
            ClientDialect::Chat => Vec::new(),
        }
    }

    fn emit_error(&mut self, code: String, message: String) -> Vec<CoalescedEvent> {
        self.done = true;
        match self.dialect {
            ClientDialect::Responses => {
                let seq = self.next_sequence();
                vec![CoalescedEvent::Responses(ResponsesStreamEvent::Error {
                    sequence_number: seq,
                    message,
                    r#type: "upstream_error".to_string(),
                    code: Some(code),
                })]
            }
            ClientDialect::AnthropicMessages => {
                vec![CoalescedEvent::Anthropic(AnthropicStreamEvent::Error {
                    error: AnthropicStreamError {
                        r#type: "upstream_error".to_string(),
                        message,
                    },
                })]
            }
            ClientDialect::Chat => Vec::new(),
        }
    }

    /// Closes out the stream: flushes buffered text, closes every open tool
    /// call (`Done`), and emits the terminal event(s) in the order the
    /// client dialect requires.
    pub fn finish(&mut self) -> Vec<CoalescedEvent> {
        if self.done || self.dialect == ClientDialect::Chat {
            self.done = true;
            return Vec::new();
        }
        let mut events = self.flush_text();
        self.done = true;

        let indices: Vec<usize> = (0..self.tool_calls.len()).collect();
        for slot in indices {
            events.extend(self.emit_tool_call_done(slot));
        }

        match self.dialect {
            ClientDialect::Responses => {
                let output_index = self.text_output_index.unwrap_or(0);
                let seq = self.next_sequence();
                events.push(CoalescedEvent::Responses(ResponsesStreamEvent::OutputTextDone {
                    sequence_number: seq,
                    output_index,
                    content_index: 0,
                    text: self.accumulated_text.clone(),
                }));
                events.push(self.emit_responses_completed());
            }
            ClientDialect::AnthropicMessages => {
                if let Some(index) = self.anthropic_text_block {
                    events.push(CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStop { index }));
                }
                events.push(self.emit_anthropic_message_delta());
                events.push(CoalescedEvent::Anthropic(AnthropicStreamEvent::MessageStop));
            }
            ClientDialect::Chat => {}
        }
        events
    }

    fn emit_tool_call_done(&mut self, slot: usize) -> Vec<CoalescedEvent> {
        self.tool_calls[slot].phase = ToolCallPhase::Done;
        match self.dialect {
            ClientDialect::Responses => {
                let track = self.tool_calls[slot].clone();
                let seq_args = self.next_sequence();
                let arguments_done = CoalescedEvent::Responses(
                    ResponsesStreamEvent::FunctionCallArgumentsDone {
                        sequence_number: seq_args,
                        output_index: track.output_index,
                        item_id: format!("fc_{}", track.output_index),
                        arguments: track.arguments.clone(),
                    },
                );
                let seq_item = self.next_sequence();
                let item_done = CoalescedEvent::Responses(ResponsesStreamEvent::OutputItemDone {
                    sequence_number: seq_item,
                    output_index: track.output_index,
                    item: ResponsesOutputItem::FunctionCall {
                        id: format!("fc_{}", track.output_index),
                        call_id: track.id.clone(),
                        name: track.name.clone(),
                        arguments: track.arguments.clone(),
                        status: ResponsesStatus::Completed,
                    },
                });
                vec![arguments_done, item_done]
            }
            ClientDialect::AnthropicMessages => {
                let track = &self.tool_calls[slot];
                vec![CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStop {
                    index: track.block_index,
                })]
            }
            ClientDialect::Chat => unreachable!("identity path never tracks tool calls"),
        }
    }

    fn emit_responses_completed(&mut self) -> CoalescedEvent {
        let seq = self.next_sequence();
        // §8: the terminal always reports `status=completed`; the upstream
        // finish reason is carried separately through `finish_reason`.
        let finish_reason = self.finish_reason.map(finish_reason_from_canonical);
        let mut output = Vec::new();
        if self.text_output_index.is_some() || !self.accumulated_text.is_empty() {
            output.push(ResponsesOutputItem::Message {
                id: format!("msg_{}", self.text_output_index.unwrap_or(0)),
                role: relaymux_protocol::responses::ResponsesRole::Assistant,
                status: ResponsesStatus::Completed,
                content: vec![relaymux_protocol::responses::ResponsesOutputTextContent {
                    r#type: "output_text".to_string(),
                    text: self.accumulated_text.clone(),
                }],
            });
        }
        for track in &self.tool_calls {
            output.push(ResponsesOutputItem::FunctionCall {
                id: format!("fc_{}", track.output_index),
                call_id: track.id.clone(),
                name: track.name.clone(),
                arguments: track.arguments.clone(),
                status: ResponsesStatus::Completed,
            });
        }
        CoalescedEvent::Responses(ResponsesStreamEvent::Completed {
            sequence_number: seq,
            response: ResponsesResponse {
                id: self.response_id.clone().unwrap_or_default(),
                object: "response".to_string(),
                created_at: self.created_at.unwrap_or_default(),
                model: self.model.clone(),
                status: ResponsesStatus::Completed,
                output,
                usage: self.usage.map(|u| ResponsesUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                    total_tokens: u.total_tokens,
                }),
                finish_reason,
            },
        })
    }

    fn emit_anthropic_message_delta(&self) -> CoalescedEvent {
        let stop_reason = self.finish_reason.map(|reason| match reason {
            CanonicalFinishReason::Length => AnthropicStopReason::MaxTokens,
            CanonicalFinishReason::ToolCalls => AnthropicStopReason::ToolUse,
            CanonicalFinishReason::ContentFilter => AnthropicStopReason::Refusal,
            CanonicalFinishReason::Stop => AnthropicStopReason::EndTurn,
        });
        let usage = self.usage.map(|u| AnthropicUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });
        CoalescedEvent::Anthropic(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: usage.unwrap_or_default(),
        })
    }
}

/// Wraps a raw upstream SSE byte channel into a client-dialect SSE byte
/// channel, driving the text-coalescing window with `tokio::time` the same
/// way a heartbeat-wrapped SSE relay drives its ticker.
pub fn spawn_coalescer(
    dialect: ClientDialect,
    model: String,
    text_window: Duration,
    mut upstream: mpsc::Receiver<Bytes>,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut coalescer = Coalescer::new(dialect, model);
        let mut parser = SseParser::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let sleep = async {
                match deadline {
                    Some(when) => tokio::time::sleep_until(when).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                maybe_chunk = upstream.recv() => {
                    match maybe_chunk {
                        Some(bytes) => {
                            for sse in parser.push_bytes(&bytes) {
                                let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&sse.data) else {
                                    continue;
                                };
                                let events = coalescer.ingest_chunk(chunk);
                                if !send_all(&tx, events).await {
                                    return;
                                }
                            }
                            if !coalescer.pending_text_is_empty() {
                                deadline = Some(Instant::now() + text_window);
                            }
                        }
                        None => {
                            for sse in parser.finish() {
                                if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&sse.data) {
                                    let events = coalescer.ingest_chunk(chunk);
                                    if !send_all(&tx, events).await {
                                        return;
                                    }
                                }
                            }
                            let events = coalescer.finish();
                            let _ = send_all(&tx, events).await;
                            return;
                        }
                    }
                }
                _ = sleep => {
                    let events = coalescer.flush_text();
                    deadline = None;
                    if !send_all(&tx, events).await {
                        return;
                    }
                }
            }
        }
    });
    rx
}

impl Coalescer {
    fn pending_text_is_empty(&self) -> bool {
        self.pending_text.is_empty()
    }
}

async fn send_all(tx: &mpsc::Sender<Bytes>, events: Vec<CoalescedEvent>) -> bool {
    for event in events {
        let Some(frame) = event.encode() else { continue };
        if tx.send(Bytes::from(frame)).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymux_protocol::chat::{ChatCompletionChunkChoice, ChatCompletionDelta, ChatFinishReason, ChatUsage};

    fn text_chunk(id: &str, content: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: id.to_string(),
            created: 1,
            model: "m1".to_string(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: Some(content.to_string()),
                    refusal: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn finish_chunk(id: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: id.to_string(),
            created: 1,
            model: "m1".to_string(),
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
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
        }
    }

    #[test]
    fn scenario_a_chat_to_responses_streaming_text() {
        let mut c = Coalescer::new(ClientDialect::Responses, "m1".to_string());
        let created = c.ingest_chunk(text_chunk("r1", "he"));
        assert_eq!(created.len(), 1);
        assert!(matches!(&created[0], CoalescedEvent::Responses(ResponsesStreamEvent::Created { sequence_number: 0, .. })));

        assert!(c.ingest_chunk(text_chunk("r1", "llo")).is_empty());

        let flushed = c.flush_text();
        assert_eq!(flushed.len(), 1);
        match &flushed[0] {
            CoalescedEvent::Responses(ResponsesStreamEvent::OutputTextDelta { sequence_number, delta, .. }) => {
                assert_eq!(*sequence_number, 1);
                assert_eq!(delta, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(c.ingest_chunk(finish_chunk("r1")).is_empty());
        let terminal = c.finish();
        assert_eq!(terminal.len(), 2);
        assert!(matches!(&terminal[0], CoalescedEvent::Responses(ResponsesStreamEvent::OutputTextDone { sequence_number: 2, .. })));
        assert!(matches!(&terminal[1], CoalescedEvent::Responses(ResponsesStreamEvent::Completed { sequence_number: 3, .. })));
    }

    #[test]
    fn tool_call_added_precedes_its_delta_and_done_is_last() {
        let mut c = Coalescer::new(ClientDialect::Responses, "m1".to_string());
        c.ingest_chunk(text_chunk("r1", ""));

        let mut chunk = text_chunk("r1", "");
        chunk.choices[0].delta.content = None;
        chunk.choices[0].delta.tool_calls = Some(vec![relaymux_protocol::chat::ChatToolCallChunk {
            index: 0,
            id: Some("c1".to_string()),
            function: Some(relaymux_protocol::chat::ChatToolCallFunctionChunk {
                name: Some("lookup".to_string()),
                arguments: None,
            }),
        }]);
        let added = c.ingest_chunk(chunk);
        assert_eq!(added.len(), 1);
        assert!(matches!(&added[0], CoalescedEvent::Responses(ResponsesStreamEvent::OutputItemAdded { .. })));

        let mut chunk = text_chunk("r1", "");
        chunk.choices[0].delta.content = None;
        chunk.choices[0].delta.tool_calls = Some(vec![relaymux_protocol::chat::ChatToolCallChunk {
            index: 0,
            id: None,
            function: Some(relaymux_protocol::chat::ChatToolCallFunctionChunk {
                name: None,
                arguments: Some("{\"q\":".to_string()),
            }),
        }]);
        let delta = c.ingest_chunk(chunk);
        assert_eq!(delta.len(), 1);
        assert!(matches!(&delta[0], CoalescedEvent::Responses(ResponsesStreamEvent::FunctionCallArgumentsDelta { .. })));

        let terminal = c.finish();
        // arguments.done, item.done, output_text.done, completed
        assert_eq!(terminal.len(), 4);
        assert!(matches!(&terminal[0], CoalescedEvent::Responses(ResponsesStreamEvent::FunctionCallArgumentsDone { .. })));
        assert!(matches!(terminal.last().unwrap(), CoalescedEvent::Responses(ResponsesStreamEvent::Completed { .. })));
    }

    #[test]
    fn anthropic_text_round_trip_emits_start_delta_stop() {
        let mut c = Coalescer::new(ClientDialect::AnthropicMessages, "m1".to_string());
        c.ingest_chunk(text_chunk("r1", "hi"));
        let flushed = c.flush_text();
        assert_eq!(flushed.len(), 2);
        assert!(matches!(&flushed[0], CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStart { index: 0, .. })));
        assert!(matches!(&flushed[1], CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockDelta { index: 0, .. })));

        c.ingest_chunk(finish_chunk("r1"));
        let terminal = c.finish();
        assert!(matches!(&terminal[0], CoalescedEvent::Anthropic(AnthropicStreamEvent::ContentBlockStop { index: 0 })));
        assert!(matches!(&terminal[1], CoalescedEvent::Anthropic(AnthropicStreamEvent::MessageDelta { .. })));
        assert!(matches!(&terminal[2], CoalescedEvent::Anthropic(AnthropicStreamEvent::MessageStop)));
    }

    #[test]
    fn chat_identity_passes_chunks_through_unmodified() {
        let mut c = Coalescer::new(ClientDialect::Chat, "m1".to_string());
        let events = c.ingest_chunk(text_chunk("r1", "hi"));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], CoalescedEvent::Chat(chunk) if chunk.id == "r1"));
        assert!(c.finish().is_empty());
    }
}
