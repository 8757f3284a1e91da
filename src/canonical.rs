//! Protocol-neutral chat model shared by every translator.
//!
//! Inbound requests of all three wire protocols are normalized into these types,
//! and every response is re-synthesized from the [`Fragment`] vocabulary defined here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two transport roles the underlying provider understands.
///
/// Protocol roles without a direct equivalent (system, developer, tool, function)
/// are folded into one of these with a bracketed marker in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            name: None,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text(text.into())])
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// All text carried by this message, tool payloads included, for token counting.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if !out.is_empty() {
                out.push('\n');
            }
            match part {
                ContentPart::Text(text) => out.push_str(text),
                ContentPart::ToolCall { name, input, .. } => {
                    out.push_str(name);
                    out.push(' ');
                    out.push_str(&input.to_string());
                }
                ContentPart::ToolResult { content, .. } => out.push_str(&content.join("\n")),
                ContentPart::Opaque { raw, .. } => out.push_str(raw),
            }
        }
        out
    }
}

/// One ordered element of a message. Order is preserved end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: Vec<String>,
    },
    /// Media or unsupported payloads, kept as a descriptive marker instead of being dropped.
    Opaque { kind: String, raw: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn opaque(kind: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Opaque {
            kind: kind.into(),
            raw: raw.into(),
        }
    }

    /// Degrade an unrecognized protocol part to text that still names its type.
    pub fn unknown(value: &serde_json::Value) -> Self {
        Self::Text(format!("[Unknown Type] {value}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Whether tool use is optional or mandatory.
///
/// There is no "forbid tools" mode: every protocol's `none` degrades to `Auto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolMode {
    #[default]
    Auto,
    Required,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub tool_mode: ToolMode,
    pub tools: Vec<ToolDeclaration>,
    /// Protocol parameters the canonical model does not interpret, carried through as-is.
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Output of a request normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
    pub stream: bool,
    pub input_token_estimate: u64,
}

/// One incremental unit produced by the underlying provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Fragment {
    TextDelta(String),
    ToolCall(ToolCallFragment),
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta(text.into())
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolCall(ToolCallFragment {
            call_id: call_id.into(),
            name: name.into(),
            input,
        })
    }
}

/// A complete tool invocation. Arguments are always fully materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub call_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCallFragment {
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.input).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-response streaming state. Owned by exactly one synthesizer and never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamState {
    pub content_index: usize,
    pub inside_text_block: bool,
    pub stop_reason: StopReason,
    pub accumulated_text_len: usize,
    pub tool_call_count: usize,
}
