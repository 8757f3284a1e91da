//! Normalize Messages API requests.
//!
//! The top-level `system` prompt becomes a marked user turn ahead of the conversation.
//! Thinking, documents and server-tool blocks are kept as descriptive markers.

use super::{apply_marker, describe_media, estimate_tokens, require_model, require_non_empty, role_marker};
use crate::canonical::{ContentPart, GenerationOptions, Message, NormalizedRequest, Role, ToolMode};
use crate::error::Result;
use crate::translate::anthropic_types::{
    ContentBlock, Message as AnthropicMessage, MessagesRequest, ToolChoice, ToolResultContent,
    TypedBlock,
};
use crate::translate::tools;

pub fn normalize(req: &MessagesRequest) -> Result<NormalizedRequest> {
    let model = require_model(req.model.as_deref())?;
    let conversation = require_non_empty(req.messages.as_ref(), "messages")?;

    let mut messages = Vec::with_capacity(conversation.len() + 1);

    if let Some(system) = &req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(Message::new(
                Role::User,
                apply_marker("SYSTEM", vec![ContentPart::text(text)]),
            ));
        }
    }

    messages.extend(conversation.iter().map(normalize_message));

    let options = GenerationOptions {
        tool_mode: tool_mode(req.tool_choice.as_ref()),
        tools: req
            .tools
            .iter()
            .flatten()
            .map(tools::from_anthropic_tool)
            .collect(),
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

fn normalize_message(msg: &AnthropicMessage) -> Message {
    let parts: Vec<ContentPart> = msg.content.blocks().iter().map(content_part).collect();

    match msg.role.as_str() {
        "user" => Message::new(Role::User, parts),
        "assistant" => Message::new(Role::Assistant, parts),
        other => Message::new(Role::User, apply_marker(&role_marker(other), parts)),
    }
}

fn content_part(block: &ContentBlock) -> ContentPart {
    let typed = match block {
        ContentBlock::Typed(typed) => typed,
        ContentBlock::Unrecognized(value) => return ContentPart::unknown(value),
    };

    match typed {
        TypedBlock::Text { text } => ContentPart::text(text.clone()),
        TypedBlock::Image { source } => describe_media("image", &source_reference(source)),
        TypedBlock::Document { source, title } => {
            let reference = title.clone().unwrap_or_else(|| source_reference(source));
            describe_media("document", &reference)
        }
        TypedBlock::ToolUse { id, name, input } => ContentPart::ToolCall {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        TypedBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_call_id: tool_use_id.clone(),
            content: tool_result_texts(content.as_ref(), *is_error),
        },
        TypedBlock::Thinking { thinking, .. } => {
            ContentPart::opaque("thinking", format!("[Thinking] {thinking}"))
        }
        TypedBlock::RedactedThinking { .. } => {
            ContentPart::opaque("redacted_thinking", "[Redacted Thinking]")
        }
        TypedBlock::ServerToolUse { name, input, .. } => {
            ContentPart::opaque("server_tool_use", format!("[Server Tool Use: {name}] {input}"))
        }
        TypedBlock::WebSearchToolResult { content, .. } => {
            ContentPart::opaque("web_search_tool_result", format!("[Web Search Result] {content}"))
        }
    }
}

/// `{type: base64, media_type, data}` or `{type: url, url}` as a short reference.
fn source_reference(source: &serde_json::Value) -> String {
    if let Some(url) = source.get("url").and_then(|u| u.as_str()) {
        return url.to_string();
    }
    let media_type = source
        .get("media_type")
        .and_then(|m| m.as_str())
        .unwrap_or("application/octet-stream");
    let data = source.get("data").and_then(|d| d.as_str()).unwrap_or("");
    format!("data:{media_type};base64,{data}")
}

fn tool_result_texts(content: Option<&ToolResultContent>, is_error: Option<bool>) -> Vec<String> {
    let mut texts: Vec<String> = match content {
        Some(ToolResultContent::Text(t)) => vec![t.clone()],
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|block| match content_part(block) {
                ContentPart::Text(text) => text,
                ContentPart::Opaque { raw, .. } => raw,
                other => format!("{other:?}"),
            })
            .collect(),
        None => Vec::new(),
    };

    if is_error == Some(true) {
        match texts.first_mut() {
            Some(first) => *first = format!("ERROR: {first}"),
            None => texts.push("ERROR: (no content)".to_string()),
        }
    }
    texts
}

/// `none` has no canonical equivalent and degrades to `Auto`.
fn tool_mode(choice: Option<&ToolChoice>) -> ToolMode {
    match choice {
        Some(ToolChoice::Any | ToolChoice::Tool { .. }) => ToolMode::Required,
        Some(ToolChoice::Auto | ToolChoice::None) | None => ToolMode::Auto,
    }
}
