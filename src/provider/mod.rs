//! Uniform contract over vision-capable model backends.
//!
//! Every backend takes an image plus a prompt and returns text together with
//! normalised token usage. Backends never retry: a failed call comes back as a
//! [`ProviderError`] and the calling stage decides what to do (Pass 1
//! escalates, Pass 2 degrades to a no-op).
//!
//! | Name        | Wire protocol                         |
//! |-------------|---------------------------------------|
//! | `gemini`    | `models/{model}:generateContent`      |
//! | `anthropic` | `/v1/messages`                        |
//! | `openai`    | `/v1/chat/completions`                |
//! | anything else | routed through `edgequake-llm`      |

pub mod anthropic;
pub mod edgequake;
pub mod gemini;
pub mod image;
pub mod openai;

use crate::config::{api_key_env, ProviderSpec};
use crate::error::{GuideError, ProviderError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub use self::image::{GeneratedImage, ImageGenerator, OpenAiImageGenerator};

/// Normalised result of one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    /// Model identifier as reported by the backend (falls back to the requested one).
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Provider name; also the key of its rate limiter.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Ask the model about one image.
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError>;

    /// Text-only completion on the same backend.
    async fn complete(&self, prompt: &str, max_tokens: usize)
        -> Result<VisionResponse, ProviderError>;
}

/// Construct the backend named by `spec`.
pub fn create_provider(
    spec: &ProviderSpec,
    timeout_secs: u64,
) -> Result<Arc<dyn VisionProvider>, GuideError> {
    let provider: Arc<dyn VisionProvider> = match spec.name.as_str() {
        "gemini" => Arc::new(gemini::GeminiProvider::new(
            resolve_api_key(spec)?,
            spec.model.clone(),
            timeout_secs,
        )?),
        "anthropic" => Arc::new(anthropic::AnthropicProvider::new(
            resolve_api_key(spec)?,
            spec.model.clone(),
            timeout_secs,
        )?),
        "openai" => Arc::new(openai::OpenAiProvider::new(
            resolve_api_key(spec)?,
            spec.model.clone(),
            timeout_secs,
        )?),
        other => Arc::new(edgequake::EdgequakeProvider::new(other, &spec.model)?),
    };
    Ok(provider)
}

fn resolve_api_key(spec: &ProviderSpec) -> Result<String, GuideError> {
    if let Some(key) = spec.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }
    let var = api_key_env(&spec.name).unwrap_or("API_KEY");
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(|k| k.trim().to_string())
        .ok_or_else(|| GuideError::ProviderNotConfigured {
            provider: spec.name.clone(),
            hint: format!("Set {var} or pass an API key in the provider spec."),
        })
}

pub(crate) fn http_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client, GuideError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GuideError::ProviderNotConfigured {
            provider: provider.to_string(),
            hint: format!("failed to build HTTP client: {e}"),
        })
}

/// Send a request and decode a JSON success body, mapping failures onto
/// [`ProviderError`] with the HTTP status and body preserved.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        detail: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response.json::<T>().await.map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        detail: format!("undecodable response body: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_key_wins() {
        let spec = ProviderSpec::new("anthropic", "claude-sonnet-4-20250514").with_api_key(" k ");
        assert_eq!(resolve_api_key(&spec).unwrap(), "k");
    }

    #[test]
    fn native_providers_are_constructed_with_explicit_keys() {
        for name in ["gemini", "anthropic", "openai"] {
            let spec = ProviderSpec::new(name, "m").with_api_key("key");
            let p = create_provider(&spec, 30).expect("provider");
            assert_eq!(p.name(), name);
            assert_eq!(p.model(), "m");
        }
    }
}
