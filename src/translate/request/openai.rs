//! Normalize Chat Completions requests.
//!
//! `system` and `developer` messages become marked user turns in place, `tool`
//! messages become tool results, and assistant `tool_calls` become tool-call parts
//! following the assistant's text.

use super::{apply_marker, describe_media, estimate_tokens, require_model, require_non_empty, role_marker};
use crate::canonical::{ContentPart, GenerationOptions, Message, NormalizedRequest, Role, ToolMode};
use crate::error::Result;
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage, ChatToolChoice, TypedPart,
};
use crate::translate::tools;

pub fn normalize(req: &ChatCompletionRequest) -> Result<NormalizedRequest> {
    let model = require_model(req.model.as_deref())?;
    let chat_messages = require_non_empty(req.messages.as_ref(), "messages")?;

    let messages: Vec<Message> = chat_messages.iter().map(normalize_message).collect();

    let mut tool_decls: Vec<_> = req
        .tools
        .iter()
        .flatten()
        .map(tools::from_openai_tool)
        .collect();
    tool_decls.extend(req.functions.iter().flatten().map(tools::from_openai_function));

    let options = GenerationOptions {
        tool_mode: tool_mode(req.tool_choice.as_ref()),
        tools: tool_decls,
        extra: req.extra.clone(),
    };

    let input_token_estimate = estimate_tokens(&messages, &options);

    Ok(NormalizedRequest {
        model,
        messages,
        options,
        stream: req.stream.unwrap_or(false),
        input_token_estimate,
    })
}

/// Whether the client asked for a trailing usage chunk.
pub fn include_usage(req: &ChatCompletionRequest) -> bool {
    req.stream_options
        .as_ref()
        .is_some_and(|opts| opts.include_usage)
}

fn normalize_message(msg: &ChatMessage) -> Message {
    let parts = content_parts(msg.content.as_ref());

    let normalized = match msg.role.as_str() {
        "user" => Message::new(Role::User, parts),
        "assistant" => Message::new(Role::Assistant, with_tool_calls(msg, parts)),
        "system" => Message::new(Role::User, apply_marker("SYSTEM", parts)),
        "developer" => Message::new(Role::User, apply_marker("DEVELOPER", parts)),
        "tool" => match &msg.tool_call_id {
            Some(id) => Message::new(Role::User, vec![tool_result(id, parts)]),
            None => Message::new(Role::User, apply_marker("TOOL", parts)),
        },
        "function" => {
            let name = msg.name.clone().unwrap_or_default();
            Message::new(Role::User, vec![tool_result(&legacy_call_id(&name), parts)])
        }
        other => Message::new(Role::User, apply_marker(&role_marker(other), parts)),
    };

    normalized.with_name(msg.name.clone())
}

fn content_parts(content: Option<&ChatContent>) -> Vec<ContentPart> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ContentPart::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts.iter().map(content_part).collect(),
    }
}

fn content_part(part: &ChatContentPart) -> ContentPart {
    match part {
        ChatContentPart::Typed(TypedPart::Text { text }) => ContentPart::text(text.clone()),
        ChatContentPart::Typed(TypedPart::Refusal { refusal }) => ContentPart::text(refusal.clone()),
        ChatContentPart::Typed(TypedPart::ImageUrl { image_url }) => {
            describe_media("image", &image_url.url)
        }
        ChatContentPart::Typed(TypedPart::InputAudio { input_audio }) => describe_media(
            "audio",
            &format!("{} ({} bytes)", input_audio.format, input_audio.data.len()),
        ),
        ChatContentPart::Typed(TypedPart::File { file }) => {
            let reference = file
                .filename
                .as_deref()
                .or(file.file_id.as_deref())
                .unwrap_or("inline file");
            describe_media("file", reference)
        }
        ChatContentPart::Unrecognized(value) => ContentPart::unknown(value),
    }
}

fn with_tool_calls(msg: &ChatMessage, mut parts: Vec<ContentPart>) -> Vec<ContentPart> {
    for call in msg.tool_calls.iter().flatten() {
        parts.push(ContentPart::ToolCall {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: tools::parse_arguments(&call.function.arguments),
        });
    }
    if let Some(call) = &msg.function_call {
        parts.push(ContentPart::ToolCall {
            id: legacy_call_id(&call.name),
            name: call.name.clone(),
            input: tools::parse_arguments(&call.arguments),
        });
    }
    parts
}

fn tool_result(tool_call_id: &str, parts: Vec<ContentPart>) -> ContentPart {
    let content = parts
        .into_iter()
        .map(|part| match part {
            ContentPart::Text(text) => text,
            ContentPart::Opaque { raw, .. } => raw,
            other => format!("{other:?}"),
        })
        .collect();
    ContentPart::ToolResult {
        tool_call_id: tool_call_id.to_string(),
        content,
    }
}

/// Legacy `function_call`/`function` pairs carry no id; link them by name.
fn legacy_call_id(name: &str) -> String {
    format!("call_{name}")
}

/// `none` has no canonical equivalent and degrades to `Auto`.
fn tool_mode(choice: Option<&ChatToolChoice>) -> ToolMode {
    match choice {
        Some(ChatToolChoice::String(mode)) if mode == "required" => ToolMode::Required,
        Some(ChatToolChoice::Specific(_)) => ToolMode::Required,
        Some(ChatToolChoice::String(_)) | None => ToolMode::Auto,
    }
}
