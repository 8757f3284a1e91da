//! Normalize `generateContent` requests.
//!
//! The model comes from the URL path rather than the body. Function calls without an
//! `id` get one synthesized here, and function responses are linked back to the oldest
//! pending call with the same name.

use std::collections::{HashMap, VecDeque};

use super::{apply_marker, describe_media, estimate_tokens, require_model, role_marker};
use crate::canonical::{ContentPart, GenerationOptions, Message, NormalizedRequest, Role, ToolMode};
use crate::error::{GatewayError, Result};
use crate::translate::gemini_types::{
    ContentInput, FunctionCall, FunctionResponse, GenerateContentRequest, Part, ToolConfig,
};
use crate::translate::tools;

pub fn normalize(model: &str, req: &GenerateContentRequest, stream: bool) -> Result<NormalizedRequest> {
    let model = require_model(Some(model))?;
    let items = match req.contents.clone().map(|c| c.into_items()) {
        Some(items) if !items.is_empty() => items,
        Some(_) => return Err(GatewayError::malformed("`contents` must not be empty")),
        None => return Err(GatewayError::malformed("`contents` is required")),
    };

    let mut ids = CallIds::default();
    let mut messages = Vec::with_capacity(items.len() + 1);

    if let Some(system) = &req.system_instruction {
        let parts = ids.parts(&input_parts(system));
        if !parts.is_empty() {
            messages.push(Message::new(Role::User, apply_marker("SYSTEM", parts)));
        }
    }

    for item in &items {
        messages.push(normalize_item(item, &mut ids));
    }

    let options = GenerationOptions {
        tool_mode: tool_mode(req.tool_config.as_ref()),
        tools: req
            .tools
            .iter()
            .flatten()
            .flat_map(tools::from_gemini_tool)
            .collect(),
        extra: req.extra.clone(),
    };

    let input_token_estimate = estimate_tokens(&messages, &options);

    Ok(NormalizedRequest {
        model,
        messages,
        options,
        stream,
        input_token_estimate,
    })
}

fn input_parts(input: &ContentInput) -> Vec<Part> {
    match input {
        ContentInput::Text(text) => vec![Part::text(text.clone())],
        ContentInput::Content(content) => content.parts.clone(),
        ContentInput::Part(part) => vec![part.clone()],
    }
}

fn normalize_item(item: &ContentInput, ids: &mut CallIds) -> Message {
    let role = match item {
        ContentInput::Content(content) => content.role.as_deref(),
        ContentInput::Text(_) | ContentInput::Part(_) => None,
    };
    let parts = ids.parts(&input_parts(item));

    match role {
        None | Some("user") => Message::new(Role::User, parts),
        Some("model") | Some("assistant") => Message::new(Role::Assistant, parts),
        Some("function") | Some("tool") => Message::new(Role::User, apply_marker("TOOL", parts)),
        Some(other) => Message::new(Role::User, apply_marker(&role_marker(other), parts)),
    }
}

/// Per-request bookkeeping for call ids that the client left out.
#[derive(Default)]
struct CallIds {
    next: usize,
    pending: HashMap<String, VecDeque<String>>,
}

impl CallIds {
    fn parts(&mut self, parts: &[Part]) -> Vec<ContentPart> {
        parts.iter().map(|p| self.part(p)).collect()
    }

    fn part(&mut self, part: &Part) -> ContentPart {
        match part {
            Part::Text { text, thought } if *thought == Some(true) => {
                ContentPart::opaque("thinking", format!("[Thinking] {text}"))
            }
            Part::Text { text, .. } => ContentPart::text(text.clone()),
            Part::InlineData { inline_data } => describe_media(
                media_kind(&inline_data.mime_type),
                &format!("data:{};base64,{}", inline_data.mime_type, inline_data.data),
            ),
            Part::FileData { file_data } => {
                let kind = file_data.mime_type.as_deref().map_or("file", media_kind);
                describe_media(kind, &file_data.file_uri)
            }
            Part::FunctionCall { function_call } => self.call(function_call),
            Part::FunctionResponse { function_response } => self.response(function_response),
            Part::ExecutableCode { executable_code } => {
                ContentPart::opaque("executable_code", format!("[Executable Code] {executable_code}"))
            }
            Part::CodeExecutionResult {
                code_execution_result,
            } => ContentPart::opaque(
                "code_execution_result",
                format!("[Code Execution Result] {code_execution_result}"),
            ),
            Part::Unrecognized(value) => ContentPart::unknown(value),
        }
    }

    fn call(&mut self, call: &FunctionCall) -> ContentPart {
        let id = match &call.id {
            Some(id) => id.clone(),
            None => {
                self.next += 1;
                format!("call_{}_{}", call.name, self.next)
            }
        };
        self.pending
            .entry(call.name.clone())
            .or_default()
            .push_back(id.clone());

        ContentPart::ToolCall {
            id,
            name: call.name.clone(),
            input: call.args.clone(),
        }
    }

    fn response(&mut self, response: &FunctionResponse) -> ContentPart {
        let queue = self.pending.get_mut(&response.name);
        let tool_call_id = match &response.id {
            Some(id) => {
                if let Some(queue) = queue {
                    queue.retain(|pending| pending != id);
                }
                id.clone()
            }
            None => queue
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| format!("call_{}", response.name)),
        };

        let content = match &response.response {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ContentPart::ToolResult {
            tool_call_id,
            content: vec![content],
        }
    }
}

fn media_kind(mime_type: &str) -> &'static str {
    match mime_type.split('/').next() {
        Some("image") => "image",
        Some("audio") => "audio",
        Some("video") => "video",
        _ if mime_type == "application/pdf" => "document",
        _ => "file",
    }
}

fn tool_mode(config: Option<&ToolConfig>) -> ToolMode {
    let mode = config
        .and_then(|c| c.function_calling_config.as_ref())
        .and_then(|f| f.mode.as_deref());
    match mode {
        Some(mode) if mode.eq_ignore_ascii_case("any") => ToolMode::Required,
        _ => ToolMode::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GenerateContentRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_roles_and_system_instruction() {
        let req = parse(json!({
            "systemInstruction": {"parts": [{"text": "be brief"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]}
            ],
            "generationConfig": {"temperature": 0.2}
        }));
        let out = normalize("gemini-2.5-flash", &req, false).unwrap();

        assert_eq!(out.model, "gemini-2.5-flash");
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[0].content, vec![ContentPart::text("[SYSTEM] be brief")]);
        assert_eq!(out.messages[1].role, Role::User);
        assert_eq!(out.messages[2].role, Role::Assistant);
        assert!(out.options.extra.contains_key("generationConfig"));
        assert!(!out.stream);
    }

    #[test]
    fn test_bare_string_contents() {
        let req = parse(json!({"contents": "what is rust?"}));
        let out = normalize("m", &req, true).unwrap();

        assert_eq!(out.messages, vec![Message::user_text("what is rust?")]);
        assert!(out.stream);
    }

    #[test]
    fn test_function_ids_are_synthesized_and_linked() {
        let req = parse(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "weather in two cities"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "weather", "args": {"city": "Oslo"}}},
                    {"functionCall": {"name": "weather", "args": {"city": "Rome"}}}
                ]},
                {"role": "function", "parts": [
                    {"functionResponse": {"name": "weather", "response": {"temp": 3}}},
                    {"functionResponse": {"name": "weather", "response": "warm"}}
                ]}
            ]
        }));
        let out = normalize("m", &req, false).unwrap();

        let call_ids: Vec<_> = out.messages[1]
            .content
            .iter()
            .map(|p| match p {
                ContentPart::ToolCall { id, .. } => id.clone(),
                other => panic!("expected tool call, got {other:?}"),
            })
            .collect();
        assert_eq!(call_ids, vec!["call_weather_1", "call_weather_2"]);

        let results = &out.messages[2].content;
        assert_eq!(
            results[0],
            ContentPart::ToolResult {
                tool_call_id: "call_weather_1".to_string(),
                content: vec![r#"{"temp":3}"#.to_string()],
            }
        );
        assert_eq!(
            results[1],
            ContentPart::ToolResult {
                tool_call_id: "call_weather_2".to_string(),
                content: vec!["warm".to_string()],
            }
        );
    }

    #[test]
    fn test_media_thought_and_unknown_parts() {
        let req = parse(json!({
            "contents": [{"role": "user", "parts": [
                {"text": "pondering", "thought": true},
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                {"frobnicate": {"level": 9}}
            ]}]
        }));
        let out = normalize("m", &req, false).unwrap();
        let parts = &out.messages[0].content;

        assert!(matches!(&parts[0], ContentPart::Opaque { kind, .. } if kind == "thinking"));
        assert!(matches!(&parts[1], ContentPart::Opaque { kind, .. } if kind == "image"));
        assert!(matches!(&parts[2], ContentPart::Text(t) if t.contains("frobnicate")));
    }

    #[test]
    fn test_tools_and_mode() {
        let req = parse(json!({
            "contents": [{"parts": [{"text": "x"}]}],
            "tools": [
                {"functionDeclarations": [{"name": "lookup", "description": "Find"}]},
                {"codeExecution": {}}
            ],
            "toolConfig": {"functionCallingConfig": {"mode": "ANY"}}
        }));
        let out = normalize("m", &req, false).unwrap();

        assert_eq!(out.options.tool_mode, ToolMode::Required);
        assert_eq!(out.options.tools.len(), 2);
        assert_eq!(out.options.tools[0].name, "lookup");

        let none = parse(json!({
            "contents": [{"parts": [{"text": "x"}]}],
            "toolConfig": {"functionCallingConfig": {"mode": "NONE"}}
        }));
        assert_eq!(normalize("m", &none, false).unwrap().options.tool_mode, ToolMode::Auto);
    }

    #[test]
    fn test_missing_contents_is_malformed() {
        let req = parse(json!({"generationConfig": {}}));
        assert_eq!(
            normalize("m", &req, false).unwrap_err().kind(),
            ErrorKind::MalformedRequest
        );
    }
}
