use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, send_json, VisionProvider, VisionResponse};
use crate::error::{GuideError, ProviderError};
use crate::pipeline::encode::to_base64;

const NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
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
        content: Vec<ContentBlock<'_>>,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            temperature: 0.1,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.trim())
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let parsed: MessagesResponse = send_json(NAME, request).await?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyContent {
                provider: NAME.to_string(),
                model: self.model.clone(),
            });
        }
        Ok(VisionResponse {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[async_trait]
impl VisionProvider for AnthropicProvider {
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
        let data = to_base64(image);
        let content = vec![
            ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: mime_type,
                    data: &data,
                },
            },
            ContentBlock::Text { text: prompt },
        ];
        self.send(content, max_tokens).await
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        self.send(vec![ContentBlock::Text { text: prompt }], max_tokens)
            .await
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_block_serialises_as_base64_source() {
        let block = ContentBlock::Image {
            source: ImageSource {
                kind: "base64",
                media_type: "image/png",
                data: "AAAA",
            },
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "image");
        assert_eq!(v["source"]["type"], "base64");
        assert_eq!(v["source"]["media_type"], "image/png");
    }

    #[test]
    fn response_skips_non_text_blocks() {
        let raw = r#"{"model":"claude-sonnet-4-20250514","content":[{"type":"thinking","thinking":"…"},{"type":"text","text":"{}"}],"usage":{"input_tokens":1200,"output_tokens":80}}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[0], ResponseBlock::Other));
        assert_eq!(parsed.usage.input_tokens, 1200);
    }
}
