//! Streaming re-synthesis: provider fragments in, protocol SSE events out.
//!
//! [`StreamSynthesizer`] owns the per-response [`StreamState`] and drives the shared
//! block lifecycle (open text block, deltas, close before a tool call, close at the
//! end). Each protocol supplies an [`EventFraming`] that turns those lifecycle steps
//! into its own wire events.
//!
//! Usage:
//!   let mut synth = StreamSynthesizer::new(AnthropicFraming::new("claude-sonnet-4"));
//!   events.extend(synth.start(input_tokens));
//!   for fragment in fragments {
//!       events.extend(synth.push(&fragment));
//!   }
//!   events.extend(synth.finish(output_tokens));

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicFraming;
pub use gemini::GeminiFraming;
pub use openai::OpenAiFraming;

use serde::Serialize;

use crate::canonical::{Fragment, StopReason, StreamState, ToolCallFragment, Usage};
use crate::error::ErrorKind;

/// One Server-Sent Event, before transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` line; `None` for data-only protocols.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(payload: &impl Serialize) -> Self {
        Self {
            event: None,
            data: to_json(payload),
        }
    }

    pub fn named(event: &str, payload: &impl Serialize) -> Self {
        Self {
            event: Some(event.to_string()),
            data: to_json(payload),
        }
    }

    /// Chat Completions end-of-stream sentinel.
    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    /// `event: ...\ndata: ...\n\n` as written on the wire.
    pub fn to_wire(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

fn to_json(payload: &impl Serialize) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
}

/// Protocol-specific rendering of the shared block lifecycle.
///
/// Indices passed in are block indices (dense, `0..N-1`). `ordinal` in
/// [`EventFraming::tool_call`] counts tool calls only.
pub trait EventFraming {
    fn message_start(&mut self, input_tokens: u64) -> Vec<SseEvent>;
    fn text_block_start(&mut self, index: usize) -> Vec<SseEvent>;
    fn text_delta(&mut self, index: usize, text: &str) -> Vec<SseEvent>;
    fn block_stop(&mut self, index: usize) -> Vec<SseEvent>;
    /// A complete tool-call block: open, full arguments, close.
    fn tool_call(&mut self, index: usize, ordinal: usize, call: &ToolCallFragment) -> Vec<SseEvent>;
    fn message_stop(&mut self, stop_reason: StopReason, usage: Usage) -> Vec<SseEvent>;
    fn error(&mut self, kind: ErrorKind, message: &str) -> Vec<SseEvent>;
}

#[derive(Debug)]
pub struct StreamSynthesizer<F> {
    framing: F,
    state: StreamState,
    input_tokens: u64,
    started: bool,
    finished: bool,
}

impl<F: EventFraming> StreamSynthesizer<F> {
    pub fn new(framing: F) -> Self {
        Self {
            framing,
            state: StreamState::default(),
            input_tokens: 0,
            started: false,
            finished: false,
        }
    }

    /// The protocol's start event. Emitted once; later calls return nothing.
    pub fn start(&mut self, input_tokens: u64) -> Vec<SseEvent> {
        if self.started || self.finished {
            return Vec::new();
        }
        self.started = true;
        self.input_tokens = input_tokens;
        self.framing.message_start(input_tokens)
    }

    pub fn push(&mut self, fragment: &Fragment) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.start(self.input_tokens);

        match fragment {
            Fragment::TextDelta(text) => {
                if !self.state.inside_text_block {
                    events.extend(self.framing.text_block_start(self.state.content_index));
                    self.state.inside_text_block = true;
                }
                events.extend(self.framing.text_delta(self.state.content_index, text));
                self.state.accumulated_text_len += text.len();
            }
            Fragment::ToolCall(call) => {
                events.extend(self.close_text_block());
                events.extend(self.framing.tool_call(
                    self.state.content_index,
                    self.state.tool_call_count,
                    call,
                ));
                self.state.content_index += 1;
                self.state.tool_call_count += 1;
                self.state.stop_reason = StopReason::ToolUse;
            }
        }
        events
    }

    /// Close any open block and emit the terminal event(s).
    pub fn finish(&mut self, output_tokens: u64) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.start(self.input_tokens);
        events.extend(self.close_text_block());

        let usage = Usage {
            input_tokens: self.input_tokens,
            output_tokens,
        };
        events.extend(self.framing.message_stop(self.state.stop_reason, usage));
        self.finished = true;
        events
    }

    /// Terminate with one protocol error event. Nothing is emitted afterwards.
    pub fn fail(&mut self, kind: ErrorKind, message: &str) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.framing.error(kind, message)
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn close_text_block(&mut self) -> Vec<SseEvent> {
        if !self.state.inside_text_block {
            return Vec::new();
        }
        let events = self.framing.block_stop(self.state.content_index);
        self.state.inside_text_block = false;
        self.state.content_index += 1;
        events
    }
}
