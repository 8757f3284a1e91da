//! Deterministic in-process provider: replays a fixed fragment script.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatProvider, FragmentStream, ModelDescriptor};
use crate::canonical::{Fragment, GenerationOptions, Message};
use crate::error::{GatewayError, Result};

/// What the last `send_request` call received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    fragments: Vec<Fragment>,
    /// Fail before the first fragment.
    error: Option<String>,
    /// Fail after this many fragments have been yielded.
    fail_after: Option<(usize, String)>,
    delay: Option<Duration>,
    models: Vec<String>,
    last_request: Mutex<Option<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            models: vec!["scripted-model".to_string()],
            ..Self::default()
        }
    }

    /// Replies with each string as one text delta.
    pub fn with_text(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| Fragment::text(*c)).collect())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    #[must_use]
    pub fn fail_after(mut self, fragments: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((fragments, message.into()));
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(ToString::to_string).collect();
        self
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_request(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(RecordedRequest {
                model: model.to_string(),
                messages: messages.to_vec(),
                options: options.clone(),
            });
        }

        if let Some(message) = &self.error {
            return Err(GatewayError::provider(message.clone()));
        }

        let fragments = self.fragments.clone();
        let fail_after = self.fail_after.clone();
        let delay = self.delay;

        let stream = async_stream::stream! {
            for (yielded, fragment) in fragments.into_iter().enumerate() {
                if let Some((after, message)) = &fail_after {
                    if yielded == *after {
                        yield Err(GatewayError::provider(message.clone()));
                        return;
                    }
                }
                if let Some(delay) = delay {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                yield Ok(fragment);
            }
            if let Some((_, message)) = fail_after {
                yield Err(GatewayError::provider(message));
            }
        };

        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, text: &str) -> Result<u64> {
        Ok((text.chars().count() as u64).div_ceil(4))
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self
            .models
            .iter()
            .map(|id| ModelDescriptor::new(id.clone(), "scripted"))
            .collect())
    }
}
