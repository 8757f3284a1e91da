//! Tool declaration and tool invocation mapping between the protocols and the canonical model.
//!
//! Hosted/built-in tools (shell, code execution, computer use, text editor, web search)
//! are recognised by their `type` across all three protocols and given a synthesized
//! description and schema. Unrecognised tool kinds become a generic declaration.

use serde_json::{json, Value};

use super::anthropic_types::{ResponseContentBlock, Tool as AnthropicTool};
use super::gemini_types::{FunctionCall, FunctionDeclaration, Part, Tool as GeminiTool};
use super::openai_types::{ChatFunction, ChatTool, ChatToolCall, ChatToolCallFunction};
use crate::canonical::{ToolCallFragment, ToolDeclaration};

/// Tool families recognised by their protocol `type` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Custom,
    Bash,
    CodeExecution,
    ComputerUse,
    TextEditor,
    WebSearch,
    Other(String),
}

impl ToolKind {
    /// Classify a tool `type`, ignoring case, underscores and version suffixes
    /// (`bash_20250124`, `web_search_preview`, `codeExecution`, ...).
    pub fn from_type(tool_type: Option<&str>) -> Self {
        let Some(raw) = tool_type else {
            return ToolKind::Custom;
        };
        let key = raw.to_ascii_lowercase().replace('_', "");

        if key.is_empty() || key == "custom" || key == "function" {
            ToolKind::Custom
        } else if key.starts_with("bash") || key.starts_with("localshell") || key == "shell" {
            ToolKind::Bash
        } else if key.starts_with("codeexecution") || key.starts_with("codeinterpreter") {
            ToolKind::CodeExecution
        } else if key.starts_with("computer") {
            ToolKind::ComputerUse
        } else if key.starts_with("texteditor") || key.starts_with("strreplace") {
            ToolKind::TextEditor
        } else if key.starts_with("websearch") || key.starts_with("googlesearch") {
            ToolKind::WebSearch
        } else {
            ToolKind::Other(raw.to_string())
        }
    }

    fn default_name(&self) -> String {
        match self {
            ToolKind::Custom => "tool".to_string(),
            ToolKind::Bash => "bash".to_string(),
            ToolKind::CodeExecution => "code_execution".to_string(),
            ToolKind::ComputerUse => "computer".to_string(),
            ToolKind::TextEditor => "str_replace_based_edit_tool".to_string(),
            ToolKind::WebSearch => "web_search".to_string(),
            ToolKind::Other(kind) => kind.clone(),
        }
    }

    fn description(&self) -> String {
        match self {
            ToolKind::Custom => String::new(),
            ToolKind::Bash => {
                "Run a shell command and return its output. Set `restart` to restart the shell session."
                    .to_string()
            }
            ToolKind::CodeExecution => {
                "Execute the given source code in a sandbox and return stdout, stderr and the result."
                    .to_string()
            }
            ToolKind::ComputerUse => {
                "Control a desktop computer: take screenshots, move and click the mouse, type text and press keys."
                    .to_string()
            }
            ToolKind::TextEditor => {
                "View, create and edit text files: view, create, str_replace, insert and undo_edit commands."
                    .to_string()
            }
            ToolKind::WebSearch => "Search the web and return relevant results for a query.".to_string(),
            ToolKind::Other(kind) => format!("Provider tool of type '{kind}'."),
        }
    }

    fn schema(&self) -> Option<Value> {
        match self {
            ToolKind::Custom | ToolKind::Other(_) => None,
            ToolKind::Bash => Some(json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to run"},
                    "restart": {"type": "boolean", "description": "Restart the shell session"}
                }
            })),
            ToolKind::CodeExecution => Some(json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Source code to execute"},
                    "language": {"type": "string"}
                },
                "required": ["code"]
            })),
            ToolKind::ComputerUse => Some(json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "description": "screenshot, left_click, type, key, mouse_move, scroll, ..."},
                    "coordinate": {"type": "array", "items": {"type": "integer"}},
                    "text": {"type": "string"}
                },
                "required": ["action"]
            })),
            ToolKind::TextEditor => Some(json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "enum": ["view", "create", "str_replace", "insert", "undo_edit"]},
                    "path": {"type": "string"},
                    "file_text": {"type": "string"},
                    "old_str": {"type": "string"},
                    "new_str": {"type": "string"},
                    "insert_line": {"type": "integer"},
                    "view_range": {"type": "array", "items": {"type": "integer"}}
                },
                "required": ["command", "path"]
            })),
            ToolKind::WebSearch => Some(json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            })),
        }
    }
}

/// Build a canonical declaration. An explicit schema always wins; built-in kinds
/// fill in whatever the protocol left out.
pub fn declare(
    kind: &ToolKind,
    name: Option<&str>,
    description: Option<&str>,
    schema: Option<&Value>,
) -> ToolDeclaration {
    let name = name
        .filter(|n| !n.is_empty())
        .map_or_else(|| kind.default_name(), str::to_string);
    let description = description
        .filter(|d| !d.is_empty())
        .map_or_else(|| kind.description(), str::to_string);
    let input_schema = schema.cloned().or_else(|| kind.schema());

    ToolDeclaration {
        name,
        description,
        input_schema,
    }
}

// -- Inbound: protocol declaration -> canonical --

pub fn from_openai_tool(tool: &ChatTool) -> ToolDeclaration {
    match &tool.function {
        Some(function) => from_openai_function(function),
        None => {
            let kind = ToolKind::from_type(Some(&tool.tool_type));
            let name = tool.extra.get("name").and_then(Value::as_str);
            declare(&kind, name, None, None)
        }
    }
}

pub fn from_openai_function(function: &ChatFunction) -> ToolDeclaration {
    declare(
        &ToolKind::Custom,
        Some(&function.name),
        function.description.as_deref(),
        function.parameters.as_ref(),
    )
}

pub fn from_anthropic_tool(tool: &AnthropicTool) -> ToolDeclaration {
    let kind = ToolKind::from_type(tool.tool_type.as_deref());
    declare(
        &kind,
        Some(&tool.name),
        tool.description.as_deref(),
        tool.input_schema.as_ref(),
    )
}

/// One Gemini tool entry can hold many function declarations plus hosted tools.
pub fn from_gemini_tool(tool: &GeminiTool) -> Vec<ToolDeclaration> {
    let mut out: Vec<ToolDeclaration> = tool
        .function_declarations
        .iter()
        .flatten()
        .map(from_gemini_function)
        .collect();

    for hosted in tool.extra.keys() {
        let kind = ToolKind::from_type(Some(hosted));
        out.push(declare(&kind, None, None, None));
    }
    out
}

pub fn from_gemini_function(function: &FunctionDeclaration) -> ToolDeclaration {
    let schema = function
        .parameters_json_schema
        .as_ref()
        .or(function.parameters.as_ref());
    declare(
        &ToolKind::Custom,
        Some(&function.name),
        function.description.as_deref(),
        schema,
    )
}

/// Tool-call arguments arrive as a JSON string in Chat Completions. Anything that
/// does not parse is kept as a JSON string value rather than dropped.
pub fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

// -- Outbound: canonical -> protocol --

pub fn to_openai_tool(decl: &ToolDeclaration) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: Some(ChatFunction {
            name: decl.name.clone(),
            description: Some(decl.description.clone()).filter(|d| !d.is_empty()),
            parameters: Some(
                decl.input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            ),
        }),
        extra: Default::default(),
    }
}

pub fn to_openai_tool_call(call: &ToolCallFragment) -> ChatToolCall {
    ChatToolCall {
        id: call.call_id.clone(),
        call_type: "function".to_string(),
        function: ChatToolCallFunction {
            name: call.name.clone(),
            arguments: call.arguments_json(),
        },
    }
}

pub fn to_anthropic_tool_use(call: &ToolCallFragment) -> ResponseContentBlock {
    ResponseContentBlock::ToolUse {
        id: call.call_id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
    }
}

pub fn to_gemini_function_call(call: &ToolCallFragment) -> Part {
    Part::FunctionCall {
        function_call: FunctionCall {
            id: Some(call.call_id.clone()),
            name: call.name.clone(),
            args: call.input.clone(),
        },
    }
}
