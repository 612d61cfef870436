//! Google Gemini over the `generateContent` REST endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, send_json, VisionProvider, VisionResponse};
use crate::error::{GuideError, ProviderError};
use crate::pipeline::encode::to_base64;

const NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
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
        parts: Vec<Part<'_>>,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
                temperature: 0.1,
            },
        };
        let request = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.trim())
            .json(&body);

        let parsed: GenerateResponse = send_json(NAME, request).await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyContent {
                provider: NAME.to_string(),
                model: self.model.clone(),
            });
        }
        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(VisionResponse {
            text,
            model: parsed.model_version.unwrap_or_else(|| self.model.clone()),
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
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
        let parts = vec![
            Part::InlineData {
                inline_data: InlineData {
                    mime_type,
                    data: &data,
                },
            },
            Part::Text { text: prompt },
        ];
        self.send(parts, max_tokens).await
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        self.send(vec![Part::Text { text: prompt }], max_tokens).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_wire_names() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data: "AAAA",
                        },
                    },
                    Part::Text { text: "hi" },
                ],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: 4096,
                temperature: 0.1,
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(v["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(v["contents"][0]["parts"][1]["text"], "hi");
    }

    #[test]
    fn response_usage_is_read() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"steps\":"},{"text":"[]}"}]}}],"usageMetadata":{"promptTokenCount":1290,"candidatesTokenCount":310},"modelVersion":"gemini-2.5-flash"}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let usage = parsed.usage_metadata.unwrap();
        assert_eq!(usage.prompt_token_count, 1290);
        assert_eq!(usage.candidates_token_count, 310);
        assert_eq!(parsed.candidates[0].content.as_ref().unwrap().parts.len(), 2);
    }
}
