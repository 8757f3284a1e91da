//! Chat Completions chunk framing: data-only events terminated by `[DONE]`.

use super::{EventFraming, SseEvent};
use crate::canonical::{StopReason, ToolCallFragment, Usage};
use crate::error::ErrorKind;
use crate::protocol::Protocol;
use crate::translate::errors::map_error;
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use crate::translate::response::openai_finish_reason;

#[derive(Debug)]
pub struct OpenAiFraming {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
}

impl OpenAiFraming {
    pub fn new(model: &str, include_usage: bool) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            include_usage,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> SseEvent {
        SseEvent::data(&ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        })
    }
}

fn empty_delta() -> ChunkDelta {
    ChunkDelta {
        role: None,
        content: None,
        tool_calls: None,
    }
}

impl EventFraming for OpenAiFraming {
    fn message_start(&mut self, _input_tokens: u64) -> Vec<SseEvent> {
        let delta = ChunkDelta {
            role: Some("assistant".to_string()),
            content: Some(String::new()),
            tool_calls: None,
        };
        vec![self.chunk(delta, None)]
    }

    // Chat Completions has no block lifecycle.
    fn text_block_start(&mut self, _index: usize) -> Vec<SseEvent> {
        Vec::new()
    }

    fn text_delta(&mut self, _index: usize, text: &str) -> Vec<SseEvent> {
        let delta = ChunkDelta {
            content: Some(text.to_string()),
            ..empty_delta()
        };
        vec![self.chunk(delta, None)]
    }

    fn block_stop(&mut self, _index: usize) -> Vec<SseEvent> {
        Vec::new()
    }

    fn tool_call(&mut self, _index: usize, ordinal: usize, call: &ToolCallFragment) -> Vec<SseEvent> {
        let delta = ChunkDelta {
            tool_calls: Some(vec![ChunkToolCall {
                index: ordinal as u64,
                id: Some(call.call_id.clone()),
                call_type: Some("function".to_string()),
                function: Some(ChunkToolCallFunction {
                    name: Some(call.name.clone()),
                    arguments: Some(call.arguments_json()),
                }),
            }]),
            ..empty_delta()
        };
        vec![self.chunk(delta, None)]
    }

    fn message_stop(&mut self, stop_reason: StopReason, usage: Usage) -> Vec<SseEvent> {
        let mut events = vec![self.chunk(
            empty_delta(),
            Some(openai_finish_reason(stop_reason).to_string()),
        )];

        if self.include_usage {
            events.push(SseEvent::data(&ChatCompletionChunk {
                id: self.id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(ChatUsage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                    total_tokens: usage.input_tokens + usage.output_tokens,
                }),
            }));
        }

        events.push(SseEvent::done());
        events
    }

    fn error(&mut self, kind: ErrorKind, message: &str) -> Vec<SseEvent> {
        let (_, body) = map_error(kind, message, Protocol::OpenAi);
        vec![SseEvent::data(&body)]
    }
}
