//! Batch re-synthesis: drain all fragments, then render one complete response.
//!
//! Consecutive text deltas merge into one text segment per contiguous run; tool
//! calls become discrete segments in arrival order. An empty fragment sequence still
//! yields one empty text segment so every protocol's content array stays non-empty.

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage as AnthropicUsage};
use super::gemini_types::{Candidate, Content, GenerateContentResponse, Part, UsageMetadata};
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage};
use super::tools;
use crate::canonical::{Fragment, StopReason, ToolCallFragment, Usage};

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    ToolCall(ToolCallFragment),
}

#[derive(Debug, Default)]
pub struct BatchAccumulator {
    segments: Vec<Segment>,
    stop_reason: StopReason,
}

/// The drained fragment sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub segments: Vec<Segment>,
    pub stop_reason: StopReason,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &Fragment) {
        match fragment {
            Fragment::TextDelta(text) => match self.segments.last_mut() {
                Some(Segment::Text(run)) => run.push_str(text),
                _ => self.segments.push(Segment::Text(text.clone())),
            },
            Fragment::ToolCall(call) => {
                self.segments.push(Segment::ToolCall(call.clone()));
                self.stop_reason = StopReason::ToolUse;
            }
        }
    }

    pub fn finish(mut self) -> BatchResult {
        if self.segments.is_empty() {
            self.segments.push(Segment::Text(String::new()));
        }
        BatchResult {
            segments: self.segments,
            stop_reason: self.stop_reason,
        }
    }
}

impl BatchResult {
    /// All text segments joined, used where a protocol has a single text field.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::ToolCall(_) => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallFragment> {
        self.segments.iter().filter_map(|s| match s {
            Segment::ToolCall(call) => Some(call),
            Segment::Text(_) => None,
        })
    }
}

pub fn openai_finish_reason(stop: StopReason) -> &'static str {
    match stop {
        StopReason::EndTurn => "stop",
        StopReason::ToolUse => "tool_calls",
    }
}

pub fn anthropic_stop_reason(stop: StopReason) -> &'static str {
    match stop {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
    }
}

/// Gemini signals tool use through `functionCall` parts, not the finish reason.
pub fn gemini_finish_reason(_stop: StopReason) -> &'static str {
    "STOP"
}

pub fn render_openai(result: &BatchResult, model: &str, usage: Usage) -> ChatCompletionResponse {
    let tool_calls: Vec<_> = result.tool_calls().map(tools::to_openai_tool_call).collect();

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(result.text()),
                tool_calls: Some(tool_calls).filter(|calls| !calls.is_empty()),
            },
            finish_reason: Some(openai_finish_reason(result.stop_reason).to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }),
    }
}

pub fn render_anthropic(result: &BatchResult, model: &str, usage: Usage) -> MessagesResponse {
    let content = result
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => ResponseContentBlock::Text { text: text.clone() },
            Segment::ToolCall(call) => tools::to_anthropic_tool_use(call),
        })
        .collect();

    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(anthropic_stop_reason(result.stop_reason).to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        },
    }
}

pub fn render_gemini(result: &BatchResult, model: &str, usage: Usage) -> GenerateContentResponse {
    let parts = result
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => Part::text(text.clone()),
            Segment::ToolCall(call) => tools::to_gemini_function_call(call),
        })
        .collect();

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                role: Some("model".to_string()),
                parts,
            },
            finish_reason: Some(gemini_finish_reason(result.stop_reason).to_string()),
            index: Some(0),
        }],
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: usage.input_tokens,
            candidates_token_count: usage.output_tokens,
            total_token_count: usage.input_tokens + usage.output_tokens,
        }),
        model_version: Some(model.to_string()),
        response_id: Some(uuid::Uuid::new_v4().simple().to_string()),
    }
}
