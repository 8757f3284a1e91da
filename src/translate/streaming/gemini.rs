//! `streamGenerateContent` framing: each event is a complete `GenerateContentResponse`.
//!
//! There is no start event and no block lifecycle; the last chunk carries the finish
//! reason and usage metadata.

use super::{EventFraming, SseEvent};
use crate::canonical::{StopReason, ToolCallFragment, Usage};
use crate::error::ErrorKind;
use crate::protocol::Protocol;
use crate::translate::errors::map_error;
use crate::translate::gemini_types::{
    Candidate, Content, GenerateContentResponse, Part, UsageMetadata,
};
use crate::translate::response::gemini_finish_reason;
use crate::translate::tools;

#[derive(Debug)]
pub struct GeminiFraming {
    response_id: String,
    model: String,
}

impl GeminiFraming {
    pub fn new(model: &str) -> Self {
        Self {
            response_id: uuid::Uuid::new_v4().simple().to_string(),
            model: model.to_string(),
        }
    }

    fn chunk(
        &self,
        parts: Vec<Part>,
        finish_reason: Option<String>,
        usage: Option<UsageMetadata>,
    ) -> SseEvent {
        SseEvent::data(&GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: Some("model".to_string()),
                    parts,
                },
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: usage,
            model_version: Some(self.model.clone()),
            response_id: Some(self.response_id.clone()),
        })
    }
}

impl EventFraming for GeminiFraming {
    fn message_start(&mut self, _input_tokens: u64) -> Vec<SseEvent> {
        Vec::new()
    }

    fn text_block_start(&mut self, _index: usize) -> Vec<SseEvent> {
        Vec::new()
    }

    fn text_delta(&mut self, _index: usize, text: &str) -> Vec<SseEvent> {
        vec![self.chunk(vec![Part::text(text)], None, None)]
    }

    fn block_stop(&mut self, _index: usize) -> Vec<SseEvent> {
        Vec::new()
    }

    fn tool_call(&mut self, _index: usize, _ordinal: usize, call: &ToolCallFragment) -> Vec<SseEvent> {
        vec![self.chunk(vec![tools::to_gemini_function_call(call)], None, None)]
    }

    fn message_stop(&mut self, stop_reason: StopReason, usage: Usage) -> Vec<SseEvent> {
        let metadata = UsageMetadata {
            prompt_token_count: usage.input_tokens,
            candidates_token_count: usage.output_tokens,
            total_token_count: usage.input_tokens + usage.output_tokens,
        };
        vec![self.chunk(
            Vec::new(),
            Some(gemini_finish_reason(stop_reason).to_string()),
            Some(metadata),
        )]
    }

    fn error(&mut self, kind: ErrorKind, message: &str) -> Vec<SseEvent> {
        let (_, body) = map_error(kind, message, Protocol::Gemini);
        vec![SseEvent::data(&body)]
    }
}
