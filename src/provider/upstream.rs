//! `ChatProvider` backed by any OpenAI-compatible `/chat/completions` endpoint.
//!
//! Canonical messages are rendered back into a Chat Completions request. The
//! response is always streamed; partial tool-call argument deltas are assembled per
//! `index` and each call is yielded as one complete fragment once it closes.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tiktoken_rs::CoreBPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChatProvider, FragmentStream, ModelDescriptor};
use crate::canonical::{ContentPart, Fragment, GenerationOptions, Message, Role, ToolMode};
use crate::error::{GatewayError, Result};
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, TypedPart,
};
use crate::translate::tools;

static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| tiktoken_rs::o200k_base().ok());

/// Gemini `generationConfig` keys with a Chat Completions equivalent.
const GENERATION_CONFIG_KEYS: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("topP", "top_p"),
    ("maxOutputTokens", "max_tokens"),
    ("stopSequences", "stop"),
    ("candidateCount", "n"),
    ("presencePenalty", "presence_penalty"),
    ("frequencyPenalty", "frequency_penalty"),
    ("seed", "seed"),
];

pub struct UpstreamProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    aliases: HashMap<String, String>,
    drop_params: Vec<String>,
}

/// One entry of an OpenAI-compatible `/models` listing.
#[derive(Debug, Deserialize)]
struct UpstreamModel {
    id: String,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamModelList {
    data: Vec<UpstreamModel>,
}

impl UpstreamProvider {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into(),
            api_key,
            aliases: HashMap::new(),
            drop_params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    #[must_use]
    pub fn with_drop_params(mut self, drop_params: Vec<String>) -> Self {
        self.drop_params = drop_params;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn upstream_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.aliases.get(model).map_or(model, String::as_str)
    }

    /// The Chat Completions body sent upstream.
    pub fn build_request(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> ChatCompletionRequest {
        let tools: Vec<_> = options.tools.iter().map(tools::to_openai_tool).collect();
        let tool_choice = match options.tool_mode {
            ToolMode::Required if !tools.is_empty() => {
                Some(ChatToolChoice::String("required".to_string()))
            }
            _ => None,
        };

        ChatCompletionRequest {
            model: Some(self.upstream_model(model).to_string()),
            messages: Some(render_messages(messages)),
            tools: Some(tools).filter(|t| !t.is_empty()),
            functions: None,
            tool_choice,
            stream: Some(true),
            stream_options: None,
            extra: self.upstream_params(&options.extra),
        }
    }

    fn upstream_params(&self, extra: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for (key, value) in extra {
            if self.drop_params.iter().any(|d| d == key) {
                continue;
            }
            match key.as_str() {
                "generationConfig" | "generation_config" => {
                    for (from, to) in GENERATION_CONFIG_KEYS {
                        if let Some(v) = value.get(*from) {
                            out.insert((*to).to_string(), v.clone());
                        }
                    }
                }
                "stop_sequences" => {
                    out.insert("stop".to_string(), value.clone());
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        out
    }
}

/// Render canonical messages as Chat Completions messages.
///
/// Tool results become `tool` messages placed ahead of any remaining user content so
/// they directly follow the assistant turn that issued the calls.
fn render_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        let mut texts = Vec::new();
        let mut calls = Vec::new();

        for part in &message.content {
            match part {
                ContentPart::Text(text) => texts.push(text.clone()),
                ContentPart::Opaque { raw, .. } => texts.push(raw.clone()),
                ContentPart::ToolCall { id, name, input } => calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                }),
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                } => {
                    let mut result = ChatMessage::new("tool", Some(ChatContent::Text(content.join("\n"))));
                    result.tool_call_id = Some(tool_call_id.clone());
                    out.push(result);
                }
            }
        }

        match message.role {
            Role::Assistant => {
                if texts.is_empty() && calls.is_empty() {
                    continue;
                }
                let content = Some(texts.join("")).filter(|t| !t.is_empty() || calls.is_empty());
                let mut msg = ChatMessage::new("assistant", content.map(ChatContent::Text));
                msg.tool_calls = Some(calls).filter(|c| !c.is_empty());
                msg.name = message.name.clone();
                out.push(msg);
            }
            Role::User => {
                if texts.is_empty() {
                    continue;
                }
                let content = if texts.len() == 1 {
                    ChatContent::Text(texts.remove(0))
                } else {
                    ChatContent::Parts(
                        texts
                            .into_iter()
                            .map(|text| ChatContentPart::Typed(TypedPart::Text { text }))
                            .collect(),
                    )
                };
                let mut msg = ChatMessage::new("user", Some(content));
                msg.name = message.name.clone();
                out.push(msg);
            }
        }
    }
    out
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call deltas into complete calls.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    pending: BTreeMap<u64, PendingCall>,
}

impl ToolCallAssembler {
    fn ingest(&mut self, chunk: &ChatCompletionChunk) -> Vec<Fragment> {
        let mut out = Vec::new();
        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            out.extend(self.drain());
            out.push(Fragment::text(text));
        }

        for delta in choice.delta.tool_calls.iter().flatten() {
            // A new index means every lower one is finished.
            if !self.pending.contains_key(&delta.index) {
                let done: Vec<u64> = self.pending.range(..delta.index).map(|(i, _)| *i).collect();
                for index in done {
                    if let Some(call) = self.pending.remove(&index) {
                        out.push(complete(call));
                    }
                }
            }

            let call = self.pending.entry(delta.index).or_default();
            if let Some(id) = &delta.id {
                call.id.clone_from(id);
            }
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    call.name.push_str(name);
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }

        if choice.finish_reason.is_some() {
            out.extend(self.drain());
        }
        out
    }

    fn drain(&mut self) -> Vec<Fragment> {
        std::mem::take(&mut self.pending)
            .into_values()
            .map(complete)
            .collect()
    }
}

fn complete(call: PendingCall) -> Fragment {
    let id = if call.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call.id
    };
    Fragment::tool_call(id, call.name, tools::parse_arguments(&call.arguments))
}

#[async_trait]
impl ChatProvider for UpstreamProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_request(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        let body = self.build_request(model, messages, options);
        let url = self.url("chat/completions");
        debug!(provider = %self.name, %url, model = ?body.model, "upstream request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Ok(Box::pin(futures::stream::empty())),
            response = builder.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, %status, "upstream returned error");
            return Err(GatewayError::provider(format!(
                "Request Failed: {} {body}",
                status.as_u16()
            )));
        }

        let events = response.bytes_stream().eventsource();
        let provider = self.name.clone();

        let stream = async_stream::stream! {
            let mut assembler = ToolCallAssembler::default();
            tokio::pin!(events);

            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(%provider, "upstream stream cancelled");
                        return;
                    }
                    next = events.next() => next,
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        yield Err(GatewayError::provider(format!("Upstream stream error: {e}")));
                        return;
                    }
                    None => break,
                };

                let data = event.data.trim();
                if data == "[DONE]" {
                    break;
                }

                match serde_json::from_str::<ChatCompletionChunk>(data) {
                    Ok(chunk) => {
                        for fragment in assembler.ingest(&chunk) {
                            yield Ok(fragment);
                        }
                    }
                    Err(e) => {
                        if data.contains("\"error\"") {
                            yield Err(GatewayError::provider(format!("Request Failed: 500 {data}")));
                            return;
                        }
                        debug!(error = %e, %data, "skipping unparseable upstream chunk");
                    }
                }
            }

            for fragment in assembler.drain() {
                yield Ok(fragment);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, text: &str) -> Result<u64> {
        let count = BPE.as_ref().map_or_else(
            || text.len() / 4,
            |bpe| bpe.encode_with_special_tokens(text).len(),
        );
        Ok(count as u64)
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        if !self.aliases.is_empty() {
            let mut ids: Vec<&String> = self.aliases.keys().collect();
            ids.sort();
            return Ok(ids
                .into_iter()
                .map(|id| ModelDescriptor::new(id.clone(), self.name.clone()))
                .collect());
        }

        let mut builder = self.client.get(self.url("models"));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::provider(format!(
                "Request Failed: {} {body}",
                status.as_u16()
            )));
        }

        let listing: UpstreamModelList = response.json().await?;
        Ok(listing
            .data
            .into_iter()
            .map(|m| ModelDescriptor {
                created: m.created.unwrap_or(0),
                ..ModelDescriptor::new(m.id, m.owned_by.unwrap_or_else(|| self.name.clone()))
            })
            .collect())
    }
}
