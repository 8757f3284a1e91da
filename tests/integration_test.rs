use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use lm_gateway::canonical::Fragment;
use lm_gateway::logging::LogLevel;
use lm_gateway::provider::{ChatProvider, ScriptedProvider, UpstreamProvider};
use lm_gateway::{build_router, AppState, GatewayConfig, SharedLogger};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_test::assert_ok;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_gateway(config: GatewayConfig, provider: Arc<dyn ChatProvider>) -> SocketAddr {
    let state = Arc::new(AppState {
        config,
        provider,
        logger: SharedLogger::in_memory(LogLevel::Debug),
    });
    serve(build_router(state)).await
}

async fn start_scripted(provider: ScriptedProvider) -> SocketAddr {
    start_gateway(GatewayConfig::default(), Arc::new(provider)).await
}

fn mixed_script() -> ScriptedProvider {
    ScriptedProvider::new(vec![
        Fragment::text("Checking"),
        Fragment::text(" now"),
        Fragment::tool_call("call_1", "get_weather", json!({"city": "London"})),
    ])
}

/// `(event name, data)` pairs from an SSE body.
fn parse_sse(body: &str) -> Vec<(Option<String>, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
                }
            }
            (!data.is_empty()).then(|| (event, data.join("\n")))
        })
        .collect()
}

async fn post_json(addr: SocketAddr, path: &str, body: Value) -> reqwest::Response {
    assert_ok!(
        reqwest::Client::new()
            .post(format!("http://{addr}{path}"))
            .json(&body)
            .send()
            .await
    )
}

async fn get_json(addr: SocketAddr, path: &str) -> (u16, Value) {
    let resp = assert_ok!(reqwest::get(format!("http://{addr}{path}")).await);
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ────────────────────────────────────────────────────────────────
// Chat Completions
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_openai_batch() {
    let addr = start_scripted(ScriptedProvider::with_text(&["Hello", " world"])).await;

    let resp = post_json(
        addr,
        "/openai/v1/chat/completions",
        json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hi"}
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello world");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_openai_stream_with_tool_call_and_usage() {
    let addr = start_scripted(mixed_script()).await;

    let resp = post_json(
        addr,
        "/openai/v1/chat/completions",
        json!({
            "model": "gpt-4o",
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": [{"role": "user", "content": "Weather?"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());

    assert_eq!(events.last().unwrap().1, "[DONE]");
    let chunks: Vec<Value> = events
        .iter()
        .filter(|(_, data)| data != "[DONE]")
        .map(|(_, data)| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Checking now");

    let call = chunks
        .iter()
        .find_map(|c| c["choices"][0]["delta"]["tool_calls"].get(0).cloned())
        .unwrap();
    assert_eq!(call["index"], 0);
    assert_eq!(call["id"], "call_1");
    assert_eq!(call["function"]["name"], "get_weather");
    let args: Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args, json!({"city": "London"}));

    let finish = chunks
        .iter()
        .find_map(|c| c["choices"][0]["finish_reason"].as_str())
        .unwrap();
    assert_eq!(finish, "tool_calls");

    let usage = chunks.last().unwrap();
    assert!(usage["choices"].as_array().unwrap().is_empty());
    assert!(usage["usage"]["completion_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_openai_mid_stream_error_ends_without_done() {
    let provider = ScriptedProvider::with_text(&["one", "two", "three"]).fail_after(
        1,
        r#"Request Failed: 503 {"error":{"message":"overloaded"}}"#,
    );
    let addr = start_scripted(provider).await;

    let resp = post_json(
        addr,
        "/openai/v1/chat/completions",
        json!({"model": "gpt-4o", "stream": true, "messages": [{"role": "user", "content": "Go"}]}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());

    assert!(events.iter().all(|(_, data)| data != "[DONE]"));
    let last: Value = serde_json::from_str(&events.last().unwrap().1).unwrap();
    assert_eq!(last["error"]["type"], "server_error");
    assert_eq!(last["error"]["message"], "overloaded");
}

// ────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_anthropic_batch_with_tool_use() {
    let addr = start_scripted(mixed_script()).await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages",
        json!({
            "model": "claude-sonnet-4",
            "max_tokens": 100,
            "system": "Use tools when helpful.",
            "tools": [{"name": "get_weather", "description": "Weather", "input_schema": {"type": "object"}}],
            "messages": [{"role": "user", "content": "Weather in London?"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["content"][0], json!({"type": "text", "text": "Checking now"}));
    assert_eq!(body["content"][1]["type"], "tool_use");
    assert_eq!(body["content"][1]["id"], "call_1");
    assert_eq!(body["content"][1]["input"], json!({"city": "London"}));
}

#[tokio::test]
async fn test_anthropic_stream_event_sequence() {
    let addr = start_scripted(mixed_script()).await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages",
        json!({
            "model": "claude-sonnet-4",
            "max_tokens": 100,
            "stream": true,
            "messages": [{"role": "user", "content": "Weather?"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());

    let names: Vec<&str> = events.iter().filter_map(|(e, _)| e.as_deref()).collect();
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

    let tool_start: Value = serde_json::from_str(&events[5].1).unwrap();
    assert_eq!(tool_start["index"], 1);
    assert_eq!(tool_start["content_block"]["type"], "tool_use");
    assert_eq!(tool_start["content_block"]["name"], "get_weather");

    let delta: Value = serde_json::from_str(&events[8].1).unwrap();
    assert_eq!(delta["delta"]["stop_reason"], "tool_use");
}

#[tokio::test]
async fn test_anthropic_upstream_error_before_stream_is_http_error() {
    let provider = ScriptedProvider::failing(
        r#"Request Failed: 429 {"error":{"type":"rate_limit_error","message":"Too many requests"}}"#,
    );
    let addr = start_scripted(provider).await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages",
        json!({
            "model": "claude-sonnet-4",
            "max_tokens": 10,
            "stream": true,
            "messages": [{"role": "user", "content": "Hi"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 429);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "Too many requests");
}

#[tokio::test]
async fn test_anthropic_count_tokens() {
    let addr = start_scripted(ScriptedProvider::with_text(&["unused"])).await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages/count_tokens",
        json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "Count these words please"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert!(body["input_tokens"].as_u64().unwrap() > 0);
}

// ────────────────────────────────────────────────────────────────
// generateContent
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gemini_batch() {
    let addr = start_scripted(ScriptedProvider::with_text(&["Bonjour"])).await;

    let resp = post_json(
        addr,
        "/gemini/v1beta/models/gemini-pro:generateContent",
        json!({
            "systemInstruction": {"parts": [{"text": "Answer in French."}]},
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let candidate = &body["candidates"][0];
    assert_eq!(candidate["content"]["role"], "model");
    assert_eq!(candidate["content"]["parts"][0]["text"], "Bonjour");
    assert_eq!(candidate["finishReason"], "STOP");
    assert!(body["usageMetadata"]["promptTokenCount"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_gemini_stream_ends_with_stop_chunk() {
    let addr = start_scripted(mixed_script()).await;

    let resp = post_json(
        addr,
        "/gemini/v1beta/models/gemini-pro:streamGenerateContent?alt=sse",
        json!({"contents": [{"role": "user", "parts": [{"text": "Weather?"}]}]}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());

    assert!(events.iter().all(|(name, _)| name.is_none()));
    let chunks: Vec<Value> = events
        .iter()
        .map(|(_, data)| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(chunks[0]["candidates"][0]["content"]["parts"][0]["text"], "Checking");
    let call = chunks
        .iter()
        .find_map(|c| c["candidates"][0]["content"]["parts"][0].get("functionCall").cloned())
        .unwrap();
    assert_eq!(call["name"], "get_weather");
    assert_eq!(call["args"], json!({"city": "London"}));

    let last = chunks.last().unwrap();
    assert_eq!(last["candidates"][0]["finishReason"], "STOP");
    assert!(last["usageMetadata"]["totalTokenCount"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_gemini_count_tokens_accepts_wrapped_request() {
    let addr = start_scripted(ScriptedProvider::with_text(&["unused"])).await;

    let bare = post_json(
        addr,
        "/gemini/v1beta/models/gemini-pro:countTokens",
        json!({"contents": [{"parts": [{"text": "How many tokens is this?"}]}]}),
    )
    .await;
    let wrapped = post_json(
        addr,
        "/gemini/v1beta/models/gemini-pro:countTokens",
        json!({"generateContentRequest": {"contents": [{"parts": [{"text": "How many tokens is this?"}]}]}}),
    )
    .await;

    let bare: Value = bare.json().await.unwrap();
    let wrapped: Value = wrapped.json().await.unwrap();
    assert!(bare["totalTokens"].as_u64().unwrap() > 0);
    assert_eq!(bare["totalTokens"], wrapped["totalTokens"]);
}

#[tokio::test]
async fn test_gemini_unknown_method_is_rejected() {
    let addr = start_scripted(ScriptedProvider::with_text(&["unused"])).await;

    let resp = post_json(
        addr,
        "/gemini/v1beta/models/gemini-pro:embedContent",
        json!({"contents": [{"parts": [{"text": "x"}]}]}),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
}

// ────────────────────────────────────────────────────────────────
// Shared behavior
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_messages_is_malformed_in_every_protocol() {
    let addr = start_scripted(ScriptedProvider::with_text(&["unused"])).await;

    let openai = post_json(addr, "/openai/v1/chat/completions", json!({"model": "gpt-4o"})).await;
    assert_eq!(openai.status(), 400);
    let body: Value = openai.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let anthropic = post_json(addr, "/anthropic/v1/messages", json!({"model": "claude-sonnet-4"})).await;
    assert_eq!(anthropic.status(), 400);
    let body: Value = anthropic.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let gemini = post_json(addr, "/gemini/v1beta/models/gemini-pro:generateContent", json!({})).await;
    assert_eq!(gemini.status(), 400);
    let body: Value = gemini.json().await.unwrap();
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_invalid_json_body_is_malformed() {
    let addr = start_scripted(ScriptedProvider::with_text(&["unused"])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("http://{addr}/anthropic/v1/messages"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
    );
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_default_model_resolves_per_protocol() {
    let mut config = GatewayConfig::default();
    config.defaults.anthropic = "anthropic-backing".to_string();
    config.defaults.gemini = "gemini-backing".to_string();

    let scripted = Arc::new(ScriptedProvider::with_text(&["ok"]));
    let addr = start_gateway(config, scripted.clone()).await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages",
        json!({"model": "default", "max_tokens": 5, "messages": [{"role": "user", "content": "Hi"}]}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(scripted.last_request().unwrap().model, "anthropic-backing");

    let resp = post_json(
        addr,
        "/gemini/v1beta/models/default:generateContent",
        json!({"contents": [{"parts": [{"text": "Hi"}]}]}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(scripted.last_request().unwrap().model, "gemini-backing");
}

#[tokio::test]
async fn test_model_listing_per_protocol() {
    let provider = ScriptedProvider::with_text(&["unused"]).with_models(&["alpha", "beta"]);
    let addr = start_scripted(provider).await;

    let (status, body) = get_json(addr, "/openai/v1/models").await;
    assert_eq!(status, 200);
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "alpha");
    assert_eq!(body["data"][0]["object"], "model");

    let (status, body) = get_json(addr, "/anthropic/v1/models").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"][1]["id"], "beta");
    assert_eq!(body["first_id"], "alpha");
    assert_eq!(body["last_id"], "beta");
    assert_eq!(body["has_more"], false);

    let (status, body) = get_json(addr, "/gemini/v1beta/models").await;
    assert_eq!(status, 200);
    assert_eq!(body["models"][0]["name"], "models/alpha");
    assert!(body["models"][0]["supportedGenerationMethods"]
        .as_array()
        .unwrap()
        .contains(&json!("generateContent")));

    let (status, body) = get_json(addr, "/anthropic/v1/models/beta").await;
    assert_eq!(status, 200);
    assert_eq!(body["type"], "model");
    assert_eq!(body["created_at"], "1970-01-01T00:00:00Z");

    let (status, body) = get_json(addr, "/openai/v1/models/missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["type"], "not_found_error");

    let (status, body) = get_json(addr, "/gemini/v1beta/models/missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_health_and_logs() {
    let addr = start_scripted(ScriptedProvider::with_text(&["ok"])).await;

    let (status, body) = get_json(addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "scripted");

    post_json(
        addr,
        "/openai/v1/chat/completions",
        json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "Hi"}]}),
    )
    .await;

    let (status, body) = get_json(addr, "/logs?limit=1").await;
    assert_eq!(status, 200);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["component"], "proxy");
    assert_eq!(entries[0]["context"]["protocol"], "openai");
}

// ────────────────────────────────────────────────────────────────
// Upstream provider against a local Chat Completions server
// ────────────────────────────────────────────────────────────────

const UPSTREAM_STREAM: &str = concat!(
    r#"data: {"id":"c","object":"chat.completion.chunk","created":0,"model":"up","choices":[{"index":0,"delta":{"role":"assistant","content":"Let me check"},"finish_reason":null}]}"#,
    "\n\n",
    r#"data: {"id":"c","object":"chat.completion.chunk","created":0,"model":"up","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_up","type":"function","function":{"name":"get_weather","arguments":""}}]},"finish_reason":null}]}"#,
    "\n\n",
    r#"data: {"id":"c","object":"chat.completion.chunk","created":0,"model":"up","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]},"finish_reason":null}]}"#,
    "\n\n",
    r#"data: {"id":"c","object":"chat.completion.chunk","created":0,"model":"up","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]},"finish_reason":null}]}"#,
    "\n\n",
    r#"data: {"id":"c","object":"chat.completion.chunk","created":0,"model":"up","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
    "\n\n",
    "data: [DONE]\n\n",
);

async fn mock_completions(Json(body): Json<Value>) -> axum::response::Response {
    if body["model"] == "limited-upstream" {
        let error = json!({"error": {"type": "rate_limit_error", "message": "slow down"}});
        return (axum::http::StatusCode::TOO_MANY_REQUESTS, Json(error)).into_response();
    }
    assert_eq!(body["stream"], true);
    ([("content-type", "text/event-stream")], UPSTREAM_STREAM).into_response()
}

async fn start_upstream_gateway() -> SocketAddr {
    let upstream = serve(Router::new().route("/v1/chat/completions", post(mock_completions))).await;

    let mut aliases = std::collections::HashMap::new();
    aliases.insert("limited".to_string(), "limited-upstream".to_string());
    let provider = UpstreamProvider::new(
        "mock",
        reqwest::Client::new(),
        format!("http://{upstream}/v1"),
        None,
    )
    .with_aliases(aliases);

    start_gateway(GatewayConfig::default(), Arc::new(provider)).await
}

#[tokio::test]
async fn test_upstream_tool_call_deltas_are_assembled() {
    let addr = start_upstream_gateway().await;

    let resp = post_json(
        addr,
        "/anthropic/v1/messages",
        json!({
            "model": "claude-sonnet-4",
            "max_tokens": 50,
            "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}],
            "messages": [{"role": "user", "content": "Weather in Paris?"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "Let me check");
    assert_eq!(body["content"][1]["id"], "call_up");
    assert_eq!(body["content"][1]["input"], json!({"city": "Paris"}));
    assert_eq!(body["stop_reason"], "tool_use");
}

#[tokio::test]
async fn test_upstream_error_maps_to_protocol_error() {
    let addr = start_upstream_gateway().await;

    let resp = post_json(
        addr,
        "/gemini/v1beta/models/limited:generateContent",
        json!({"contents": [{"parts": [{"text": "Hi"}]}]}),
    )
    .await;
    assert_eq!(resp.status(), 429);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], 429);
    assert_eq!(body["error"]["status"], "RESOURCE_EXHAUSTED");
    assert_eq!(body["error"]["message"], "slow down");
}
