use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, send_json, VisionProvider, VisionResponse};
use crate::error::{GuideError, ProviderError};
use crate::pipeline::encode::data_uri;

const NAME: &str = "openai";
pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self, GuideError> {
        Ok(Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: http_client(NAME, timeout_secs)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(
        &self,
        content: Vec<ContentPart<'_>>,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        // `max_completion_tokens` is accepted by every current chat model;
        // the older `max_tokens` is rejected by reasoning models.
        let body = ChatRequest {
            model: &self.model,
            max_completion_tokens: max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body);

        let parsed: ChatResponse = send_json(NAME, request).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyContent {
                provider: NAME.to_string(),
                model: self.model.clone(),
            });
        }
        let usage = parsed.usage.unwrap_or_default();
        Ok(VisionResponse {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
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
        let url = data_uri(mime_type, image);
        let content = vec![
            ContentPart::Text { text: prompt },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: &url,
                    detail: "high",
                },
            },
        ];
        self.send(content, max_tokens).await
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        self.send(vec![ContentPart::Text { text: prompt }], max_tokens)
            .await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_completion_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
