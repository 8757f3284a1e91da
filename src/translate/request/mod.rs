//! Request normalizers: one per inbound protocol, each producing a [`NormalizedRequest`].
//!
//! All normalizers are pure. They fail only with `MalformedRequest`, when the model
//! identifier or the conversation is missing or empty.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::canonical::{ContentPart, GenerationOptions, Message};
use crate::error::{GatewayError, Result};

fn require_model(model: Option<&str>) -> Result<String> {
    match model.map(str::trim) {
        Some(m) if !m.is_empty() => Ok(m.to_string()),
        _ => Err(GatewayError::malformed("`model` is required")),
    }
}

fn require_non_empty<'a, T>(items: Option<&'a Vec<T>>, field: &str) -> Result<&'a [T]> {
    match items {
        Some(items) if !items.is_empty() => Ok(items),
        Some(_) => Err(GatewayError::malformed(format!("`{field}` must not be empty"))),
        None => Err(GatewayError::malformed(format!("`{field}` is required"))),
    }
}

/// Fold a role with no canonical equivalent into the text: the first text part gets
/// the `[MARKER]` prefix, or a marker part is inserted in front. Messages made only of
/// tool results are left alone since the result part already says what they are.
fn apply_marker(marker: &str, mut parts: Vec<ContentPart>) -> Vec<ContentPart> {
    if !parts.is_empty()
        && parts
            .iter()
            .all(|p| matches!(p, ContentPart::ToolResult { .. }))
    {
        return parts;
    }
    match parts.first_mut() {
        Some(ContentPart::Text(text)) => {
            *text = format!("[{marker}] {text}");
        }
        _ => parts.insert(0, ContentPart::text(format!("[{marker}]"))),
    }
    parts
}

/// Marker for a role name nobody told us about, e.g. `critic` -> `CRITIC`.
fn role_marker(role: &str) -> String {
    role.to_ascii_uppercase()
}

/// Describe a media reference without copying its payload.
fn describe_media(kind: &str, reference: &str) -> ContentPart {
    let label = match kind {
        "image" => "Image",
        "audio" => "Audio",
        "document" => "Document",
        "file" => "File",
        other => other,
    };
    ContentPart::opaque(kind, format!("[{label}: {}]", summarize_reference(reference)))
}

fn summarize_reference(reference: &str) -> String {
    match reference.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').unwrap_or((rest, ""));
            format!("{meta} ({} bytes)", payload.len())
        }
        None => reference.to_string(),
    }
}

/// Text sent to the provider's token counter for the request as a whole.
pub fn token_text(messages: &[Message], options: &GenerationOptions) -> String {
    let mut text = messages
        .iter()
        .map(Message::plain_text)
        .collect::<Vec<_>>()
        .join("\n");
    for tool in &options.tools {
        text.push('\n');
        text.push_str(&tool.name);
        text.push(' ');
        text.push_str(&tool.description);
        if let Some(schema) = &tool.input_schema {
            text.push(' ');
            text.push_str(&schema.to_string());
        }
    }
    text
}

/// Local estimate used until (or instead of) the provider's own count.
pub fn estimate_tokens(messages: &[Message], options: &GenerationOptions) -> u64 {
    let chars = token_text(messages, options).chars().count() as u64;
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Role;

    #[test]
    fn test_require_model_rejects_blank() {
        assert!(require_model(None).is_err());
        assert!(require_model(Some("  ")).is_err());
        assert_eq!(require_model(Some("gpt-4o")).unwrap(), "gpt-4o");
    }

    #[test]
    fn test_apply_marker_prefixes_first_text() {
        let parts = apply_marker("SYSTEM", vec![ContentPart::text("be brief")]);
        assert_eq!(parts, vec![ContentPart::text("[SYSTEM] be brief")]);
    }

    #[test]
    fn test_apply_marker_inserts_before_non_text() {
        let parts = apply_marker("TOOL", vec![ContentPart::opaque("image", "[Image: x]")]);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ContentPart::text("[TOOL]"));
    }

    #[test]
    fn test_data_uri_is_summarized() {
        let part = describe_media("image", "data:image/png;base64,AAAA");
        assert_eq!(
            part,
            ContentPart::opaque("image", "[Image: image/png;base64 (4 bytes)]")
        );
    }

    #[test]
    fn test_estimate_is_positive_for_text() {
        let messages = vec![Message::new(Role::User, vec![ContentPart::text("hello world")])];
        assert_eq!(estimate_tokens(&messages, &GenerationOptions::default()), 3);
    }
}
