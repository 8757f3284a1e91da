//! Messages API framing: named SSE events with explicit content-block lifecycle.

use super::{EventFraming, SseEvent};
use crate::canonical::{StopReason, ToolCallFragment, Usage};
use crate::error::ErrorKind;
use crate::protocol::Protocol;
use crate::translate::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
    Usage as AnthropicUsage,
};
use crate::translate::errors::map_error;
use crate::translate::response::anthropic_stop_reason;

#[derive(Debug)]
pub struct AnthropicFraming {
    id: String,
    model: String,
}

impl AnthropicFraming {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
        }
    }
}

fn event(ev: StreamEvent) -> SseEvent {
    SseEvent::named(ev.event_name(), &ev)
}

impl EventFraming for AnthropicFraming {
    fn message_start(&mut self, input_tokens: u64) -> Vec<SseEvent> {
        vec![event(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens,
                    output_tokens: 0,
                },
            },
        })]
    }

    fn text_block_start(&mut self, index: usize) -> Vec<SseEvent> {
        vec![event(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        })]
    }

    fn text_delta(&mut self, index: usize, text: &str) -> Vec<SseEvent> {
        vec![event(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        })]
    }

    fn block_stop(&mut self, index: usize) -> Vec<SseEvent> {
        vec![event(StreamEvent::ContentBlockStop { index })]
    }

    fn tool_call(&mut self, index: usize, _ordinal: usize, call: &ToolCallFragment) -> Vec<SseEvent> {
        vec![
            event(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse {
                    id: call.call_id.clone(),
                    name: call.name.clone(),
                    input: serde_json::json!({}),
                },
            }),
            event(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: call.arguments_json(),
                },
            }),
            event(StreamEvent::ContentBlockStop { index }),
        ]
    }

    fn message_stop(&mut self, stop_reason: StopReason, usage: Usage) -> Vec<SseEvent> {
        vec![
            event(StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(anthropic_stop_reason(stop_reason).to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: usage.output_tokens,
                },
            }),
            event(StreamEvent::MessageStop),
        ]
    }

    fn error(&mut self, kind: ErrorKind, message: &str) -> Vec<SseEvent> {
        let (_, body) = map_error(kind, message, Protocol::Anthropic);
        vec![SseEvent::named("error", &body)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Fragment;
    use crate::translate::streaming::StreamSynthesizer;
    use serde_json::{json, Value};

    fn run(fragments: &[Fragment]) -> Vec<(String, Value)> {
        let mut synth = StreamSynthesizer::new(AnthropicFraming::new("claude-sonnet-4"));
        let mut events = synth.start(12);
        for f in fragments {
            events.extend(synth.push(f));
        }
        events.extend(synth.finish(3));
        events
            .into_iter()
            .map(|e| (e.event.unwrap(), serde_json::from_str(&e.data).unwrap()))
            .collect()
    }

    #[test]
    fn test_mixed_stream_event_sequence() {
        let events = run(&[
            Fragment::text("Hi "),
            Fragment::text("there"),
            Fragment::tool_call("c1", "lookup", json!({"q": "x"})),
        ]);

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert_eq!(events[1].1["index"], 0);
        assert_eq!(events[1].1["content_block"]["type"], "text");
        assert_eq!(events[2].1["delta"]["text"], "Hi ");
        assert_eq!(events[3].1["delta"]["text"], "there");
        assert_eq!(events[4].1["index"], 0);

        let tool_start = &events[5].1;
        assert_eq!(tool_start["index"], 1);
        assert_eq!(tool_start["content_block"]["type"], "tool_use");
        assert_eq!(tool_start["content_block"]["id"], "c1");
        assert_eq!(tool_start["content_block"]["name"], "lookup");
        assert_eq!(events[6].1["delta"]["type"], "input_json_delta");
        assert_eq!(events[6].1["delta"]["partial_json"], r#"{"q":"x"}"#);
        assert_eq!(events[7].1["index"], 1);

        assert_eq!(events[8].1["delta"]["stop_reason"], "tool_use");
        assert_eq!(events[8].1["usage"]["output_tokens"], 3);
        assert_eq!(events[9].1["type"], "message_stop");
    }

    #[test]
    fn test_message_start_carries_input_usage() {
        let events = run(&[Fragment::text("ok")]);
        let message = &events[0].1["message"];
        assert!(message["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(message["usage"]["input_tokens"], 12);
        assert_eq!(message["content"], json!([]));
        assert_eq!(events[events.len() - 2].1["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn test_every_block_is_closed() {
        let events = run(&[
            Fragment::tool_call("a", "f", json!({})),
            Fragment::text("between"),
            Fragment::tool_call("b", "g", json!({})),
            Fragment::text("tail"),
        ]);
        let starts: Vec<u64> = events
            .iter()
            .filter(|(n, _)| n == "content_block_start")
            .map(|(_, v)| v["index"].as_u64().unwrap())
            .collect();
        let stops: Vec<u64> = events
            .iter()
            .filter(|(n, _)| n == "content_block_stop")
            .map(|(_, v)| v["index"].as_u64().unwrap())
            .collect();
        assert_eq!(starts, vec![0, 1, 2, 3]);
        assert_eq!(stops, starts);
    }

    #[test]
    fn test_error_event() {
        let mut synth = StreamSynthesizer::new(AnthropicFraming::new("m"));
        synth.start(0);
        let events = synth.fail(ErrorKind::Unknown, "boom");
        assert_eq!(events[0].event.as_deref(), Some("error"));
        let body: Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "api_error");
    }
}
