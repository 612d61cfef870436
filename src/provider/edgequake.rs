//! Fallback backend for any provider name without a native client.
//!
//! `edgequake-llm` reads the provider's API key from its usual environment
//! variable (`OLLAMA_HOST`, `AZURE_OPENAI_API_KEY`, …) and speaks its wire
//! protocol; this adapter only maps requests and usage onto [`VisionResponse`].

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

use super::{VisionProvider, VisionResponse};
use crate::error::{GuideError, ProviderError};
use crate::pipeline::encode::to_base64;

pub struct EdgequakeProvider {
    name: String,
    model: String,
    inner: Arc<dyn LLMProvider>,
}

impl EdgequakeProvider {
    pub fn new(name: &str, model: &str) -> Result<Self, GuideError> {
        let inner = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            GuideError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::from_llm(name, model, inner))
    }

    /// Wrap an already-built `edgequake-llm` provider.
    pub fn from_llm(name: &str, model: &str, inner: Arc<dyn LLMProvider>) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            inner,
        }
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let options = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(max_tokens),
            ..Default::default()
        };
        let response = self
            .inner
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.name.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(ProviderError::EmptyContent {
                provider: self.name.clone(),
                model: self.model.clone(),
            });
        }
        Ok(VisionResponse {
            text: response.content,
            model: self.model.clone(),
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

#[async_trait]
impl VisionProvider for EdgequakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let image = ImageData::new(to_base64(image), mime_type).with_detail("high");
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
        self.chat(messages, max_tokens).await
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let messages = vec![ChatMessage::user_with_images(prompt, Vec::new())];
        self.chat(messages, max_tokens).await
    }
}
