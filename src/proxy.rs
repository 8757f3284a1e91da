//! Per-request pipeline: count input tokens, invoke the provider, re-synthesize.
//!
//! Callers have already resolved the reserved default model and normalized the
//! request. Input tokens are counted before the first fragment is requested and
//! output tokens after the last one is consumed.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::canonical::{Fragment, NormalizedRequest, Usage};
use crate::error::Result;
use crate::logging::{LogLevel, SharedLogger};
use crate::protocol::Protocol;
use crate::provider::ChatProvider;
use crate::translate::response::{BatchAccumulator, BatchResult};
use crate::translate::streaming::{EventFraming, SseEvent, StreamSynthesizer};

/// Protocol events for one streaming response, ready for SSE framing.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// Input token count: the provider's own count, or the normalizer's estimate if that fails.
pub async fn count_input_tokens(
    provider: &dyn ChatProvider,
    req: &NormalizedRequest,
    logger: &SharedLogger,
) -> u64 {
    match provider
        .count_message_tokens(&req.messages, &req.options)
        .await
    {
        Ok(count) => count,
        Err(e) => {
            logger.warn(
                "proxy",
                format!("Token count failed, using estimate: {e}"),
            );
            req.input_token_estimate
        }
    }
}

async fn count_output_tokens(provider: &dyn ChatProvider, output: &str) -> u64 {
    provider
        .count_tokens(output)
        .await
        .unwrap_or_else(|_| (output.chars().count() as u64).div_ceil(4))
}

/// Text the output-token count is taken over.
fn record_output(output: &mut String, fragment: &Fragment) {
    match fragment {
        Fragment::TextDelta(text) => output.push_str(text),
        Fragment::ToolCall(call) => {
            output.push_str(&call.name);
            output.push_str(&call.arguments_json());
        }
    }
}

fn log_completion(
    logger: &SharedLogger,
    protocol: Protocol,
    req: &NormalizedRequest,
    usage: Usage,
    tool_calls: usize,
) {
    tracing::info!(
        %protocol,
        model = %req.model,
        stream = req.stream,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "request completed"
    );
    logger.log_with_context(
        LogLevel::Info,
        "proxy",
        format!("Completed {protocol} request model={}", req.model),
        json!({
            "protocol": protocol.name(),
            "model": req.model,
            "stream": req.stream,
            "messages": req.messages.len(),
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
            "tool_calls": tool_calls,
        }),
    );
}

/// Drain the provider to completion.
pub async fn run_batch(
    provider: &Arc<dyn ChatProvider>,
    logger: &SharedLogger,
    protocol: Protocol,
    req: &NormalizedRequest,
) -> Result<(BatchResult, Usage)> {
    let input_tokens = count_input_tokens(provider.as_ref(), req, logger).await;

    let mut fragments = provider
        .send_request(
            &req.model,
            &req.messages,
            &req.options,
            CancellationToken::new(),
        )
        .await?;

    let mut accumulator = BatchAccumulator::new();
    let mut output = String::new();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        record_output(&mut output, &fragment);
        accumulator.push(&fragment);
    }

    let usage = Usage {
        input_tokens,
        output_tokens: count_output_tokens(provider.as_ref(), &output).await,
    };
    let result = accumulator.finish();
    log_completion(logger, protocol, req, usage, result.tool_calls().count());
    Ok((result, usage))
}

/// Start a streaming response.
///
/// Errors raised before the first fragment are returned here so the caller can answer
/// with a plain HTTP error. After that, a provider error becomes one protocol error
/// event and the stream ends. Once `cancel` fires (or the returned stream is dropped)
/// nothing more is emitted, not even a terminal event.
pub async fn run_stream<F>(
    provider: Arc<dyn ChatProvider>,
    logger: SharedLogger,
    protocol: Protocol,
    req: NormalizedRequest,
    framing: F,
    cancel: CancellationToken,
) -> Result<SseStream>
where
    F: EventFraming + Send + 'static,
{
    let input_tokens = count_input_tokens(provider.as_ref(), &req, &logger).await;

    let mut fragments = provider
        .send_request(&req.model, &req.messages, &req.options, cancel.clone())
        .await?;

    let first = tokio::select! {
        () = cancel.cancelled() => None,
        first = fragments.next() => first,
    };
    let first = match first {
        Some(Err(e)) => return Err(e),
        other => other,
    };

    // Dropping the response body (client disconnect) cancels the provider.
    let guard = cancel.clone().drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        if cancel.is_cancelled() {
            return;
        }
        let mut synth = StreamSynthesizer::new(framing);
        let mut output = String::new();
        let mut buffered = Some(first);

        for event in synth.start(input_tokens) {
            yield event;
        }

        loop {
            let item = match buffered.take() {
                Some(item) => item,
                None => tokio::select! {
                    () = cancel.cancelled() => None,
                    item = fragments.next() => item,
                },
            };
            if cancel.is_cancelled() {
                logger.info("proxy", format!("{protocol} stream cancelled model={}", req.model));
                return;
            }

            match item {
                Some(Ok(fragment)) => {
                    record_output(&mut output, &fragment);
                    for event in synth.push(&fragment) {
                        yield event;
                    }
                }
                Some(Err(e)) => {
                    let (kind, message) = e.classify();
                    tracing::warn!(%protocol, ?kind, error = %message, "provider failed mid-stream");
                    logger.log_with_context(
                        LogLevel::Error,
                        "proxy",
                        format!("{protocol} stream failed: {message}"),
                        json!({"protocol": protocol.name(), "model": req.model, "kind": format!("{kind:?}")}),
                    );
                    for event in synth.fail(kind, &message) {
                        yield event;
                    }
                    return;
                }
                None => break,
            }
        }

        let usage = Usage {
            input_tokens,
            output_tokens: count_output_tokens(provider.as_ref(), &output).await,
        };
        let tool_calls = synth.state().tool_call_count;
        for event in synth.finish(usage.output_tokens) {
            yield event;
        }
        log_completion(&logger, protocol, &req, usage, tool_calls);
    };

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{GenerationOptions, Message};
    use crate::error::ErrorKind;
    use crate::provider::ScriptedProvider;
    use crate::translate::streaming::AnthropicFraming;
    use serde_json::json;
    use std::time::Duration;

    fn request(stream: bool) -> NormalizedRequest {
        NormalizedRequest {
            model: "scripted-model".to_string(),
            messages: vec![Message::user_text("hello there")],
            options: GenerationOptions::default(),
            stream,
            input_token_estimate: 99,
        }
    }

    fn logger() -> SharedLogger {
        SharedLogger::in_memory(LogLevel::Debug)
    }

    #[tokio::test]
    async fn test_batch_counts_tokens_with_provider() {
        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::with_text(&["Hi ", "there"]));
        let logger = logger();
        let (result, usage) = run_batch(&provider, &logger, Protocol::OpenAi, &request(false))
            .await
            .unwrap();

        assert_eq!(result.text(), "Hi there");
        // "hello there" is 11 chars
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(logger.recent(1)[0].context.as_ref().unwrap()["protocol"], "openai");
    }

    #[tokio::test]
    async fn test_error_before_first_fragment_is_returned() {
        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::failing(
            r#"Request Failed: 429 {"error":{"type":"rate_limit_error","message":"slow down"}}"#,
        ));
        let result = run_stream(
            provider,
            logger(),
            Protocol::Anthropic,
            request(true),
            AnthropicFraming::new("m"),
            CancellationToken::new(),
        )
        .await;

        match result {
            Err(e) => assert_eq!(e.kind(), ErrorKind::QuotaExceeded),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_one_event() {
        let provider: Arc<dyn ChatProvider> =
            Arc::new(ScriptedProvider::with_text(&["a", "b", "c"]).fail_after(2, "socket closed"));
        let stream = run_stream(
            provider,
            logger(),
            Protocol::Anthropic,
            request(true),
            AnthropicFraming::new("m"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let events: Vec<SseEvent> = stream.collect().await;

        let names: Vec<&str> = events.iter().filter_map(|e| e.event.as_deref()).collect();
        assert_eq!(names.last(), Some(&"error"));
        assert_eq!(names.iter().filter(|n| **n == "error").count(), 1);
        assert!(!names.contains(&"message_stop"));
    }

    #[tokio::test]
    async fn test_cancelled_stream_has_no_terminal_event() {
        let provider: Arc<dyn ChatProvider> = Arc::new(
            ScriptedProvider::with_text(&["a", "b", "c", "d"]).with_delay(Duration::from_millis(20)),
        );
        let cancel = CancellationToken::new();
        let mut stream = run_stream(
            provider,
            logger(),
            Protocol::Anthropic,
            request(true),
            AnthropicFraming::new("m"),
            cancel.clone(),
        )
        .await
        .unwrap();

        let mut names = Vec::new();
        while let Some(event) = stream.next().await {
            let name = event.event.clone().unwrap_or_default();
            if name == "content_block_delta" {
                cancel.cancel();
            }
            names.push(name);
        }

        assert!(names.contains(&"content_block_delta".to_string()));
        assert!(!names.contains(&"message_delta".to_string()));
        assert!(!names.contains(&"message_stop".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_before_first_fragment_emits_nothing() {
        let provider: Arc<dyn ChatProvider> = Arc::new(
            ScriptedProvider::with_text(&["late"]).with_delay(Duration::from_millis(200)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let stream = run_stream(
            provider,
            logger(),
            Protocol::Anthropic,
            request(true),
            AnthropicFraming::new("m"),
            cancel,
        )
        .await
        .unwrap();
        let events: Vec<SseEvent> = stream.collect().await;

        assert!(events.is_empty(), "events after cancel: {events:?}");
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_provider() {
        let provider: Arc<dyn ChatProvider> = Arc::new(
            ScriptedProvider::with_text(&["a", "b", "c"]).with_delay(Duration::from_millis(10)),
        );
        let cancel = CancellationToken::new();
        let mut stream = run_stream(
            provider,
            logger(),
            Protocol::OpenAi,
            request(true),
            crate::translate::streaming::OpenAiFraming::new("m", false),
            cancel.clone(),
        )
        .await
        .unwrap();

        assert!(stream.next().await.is_some());
        assert!(!cancel.is_cancelled());

        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_with_tool_call_reports_usage() {
        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::new(vec![
            Fragment::text("Looking"),
            Fragment::tool_call("c1", "lookup", json!({"q": "x"})),
        ]));
        let stream = run_stream(
            provider,
            logger(),
            Protocol::Anthropic,
            request(true),
            AnthropicFraming::new("m"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let events: Vec<SseEvent> = stream.collect().await;

        let delta = events
            .iter()
            .find(|e| e.event.as_deref() == Some("message_delta"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&delta.data).unwrap();
        assert_eq!(body["delta"]["stop_reason"], "tool_use");
        assert!(body["usage"]["output_tokens"].as_u64().unwrap() > 0);
    }
}
