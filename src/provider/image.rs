//! Text-to-image backend for step illustrations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::openai::DEFAULT_BASE_URL;
use super::{http_client, send_json};
use crate::error::{GuideError, ProviderError};

const NAME: &str = "openai-images";

/// One generated illustration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Hosted URL, or a `data:image/png;base64,…` URI when the backend returns bytes.
    pub url: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Rate-limiter key for this backend.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, model: &str) -> Result<GeneratedImage, ProviderError>;
}

pub struct OpenAiImageGenerator {
    api_key: String,
    base_url: String,
    size: String,
    client: reqwest::Client,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, GuideError> {
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            size: "1024x1024".to_string(),
            client: http_client(NAME, timeout_secs)?,
        })
    }

    /// Build from `OPENAI_API_KEY`.
    pub fn from_env(timeout_secs: u64) -> Result<Self, GuideError> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GuideError::ProviderNotConfigured {
                provider: NAME.to_string(),
                hint: "Set OPENAI_API_KEY or disable illustrations.".to_string(),
            })?;
        Self::new(key, timeout_secs)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<GeneratedImage, ProviderError> {
        let body = ImagesRequest {
            model,
            prompt,
            size: &self.size,
            n: 1,
        };
        let request = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body);

        let parsed: ImagesResponse = send_json(NAME, request).await?;
        let url = parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| {
                d.url
                    .filter(|u| !u.is_empty())
                    .or_else(|| d.b64_json.map(|b| format!("data:image/png;base64,{b}")))
            })
            .ok_or_else(|| ProviderError::EmptyContent {
                provider: NAME.to_string(),
                model: model.to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(GeneratedImage {
            url,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
    }
}

#[derive(Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
    #[serde(default)]
    usage: Option<ImageUsage>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64_response_parses_with_usage() {
        let raw = r#"{"created":1,"data":[{"b64_json":"iVBORw0"}],"usage":{"input_tokens":52,"output_tokens":4160,"total_tokens":4212}}"#;
        let parsed: ImagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].b64_json.as_deref(), Some("iVBORw0"));
        assert_eq!(parsed.usage.unwrap().output_tokens, 4160);
    }
}
