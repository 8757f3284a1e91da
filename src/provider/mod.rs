//! The underlying chat-completion capability every protocol is served from.

pub mod scripted;
pub mod upstream;

pub use scripted::ScriptedProvider;
pub use upstream::UpstreamProvider;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::canonical::{Fragment, GenerationOptions, Message};
use crate::error::{GatewayError, Result};
use crate::translate::request::token_text;

/// Ordered fragments for one response. Ends early when the request is cancelled.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub owned_by: String,
    /// Unix seconds
    pub created: i64,
    pub input_token_limit: u64,
    pub output_token_limit: u64,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            owned_by: owned_by.into(),
            created: 0,
            input_token_limit: 128_000,
            output_token_limit: 16_384,
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Start generating. Fragments are requested lazily; dropping the stream or
    /// cancelling `cancel` stops generation.
    async fn send_request(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<FragmentStream>;

    async fn count_tokens(&self, text: &str) -> Result<u64>;

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    async fn get_model(&self, id: &str) -> Result<ModelDescriptor> {
        self.list_models()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| GatewayError::model_not_found(id))
    }

    /// Token count for a whole conversation, tool declarations included.
    async fn count_message_tokens(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<u64> {
        self.count_tokens(&token_text(messages, options)).await
    }
}
