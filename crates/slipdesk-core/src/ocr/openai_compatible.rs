//! OpenAI-compatible backend implementation
//!
//! Works with any server that implements the OpenAI chat completions API with
//! image inputs (OpenAI, vLLM, LocalAI, llama-server with a vision model).
//!
//! # Configuration
//!
//! Environment variables:
//! - `OCR_HOST`: Server URL (required)
//! - `OCR_MODEL`: Model name (default: gpt-4o-mini)
//! - `OCR_API_KEY`: API key if required (optional)

use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::parsing::{classify_upstream_error, parse_json_object};
use super::types::{OcrExtraction, OcrResponse, TokenUsage};
use super::{fetch_image, OcrBackend, EXTRACTION_PROMPT, FLAT_RESPONSE_CONFIDENCE};

/// OpenAI-compatible vision backend
#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleBackend {
    /// Create a new OpenAI-compatible backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    /// Create with an API key
    pub fn with_api_key(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url, model)
        }
    }

    /// Create from environment variables
    ///
    /// Required: `OCR_HOST`
    /// Optional: `OCR_MODEL` (default: gpt-4o-mini)
    /// Optional: `OCR_API_KEY`
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OCR_HOST").ok()?;
        let model = std::env::var("OCR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let mut backend = Self::new(&host, &model);
        backend.api_key = std::env::var("OCR_API_KEY").ok().filter(|k| !k.is_empty());
        Some(backend)
    }

    /// Make a vision request with the extraction prompt
    async fn vision_completion(
        &self,
        mime_type: &str,
        image_data: &[u8],
    ) -> Result<ChatCompletionResponse> {
        let base64_image = base64::engine::general_purpose::STANDARD.encode(image_data);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: EXTRACTION_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", mime_type, base64_image),
                        },
                    },
                ],
            }],
            temperature: Some(0.1),
            max_tokens: Some(4096),
            stream: false,
        };

        let mut req_builder = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upstream_error(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            Error::OcrMalformed(format!("Unexpected chat completion envelope: {}", e))
        })
    }
}

/// OpenAI chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

/// Content part for multimodal messages
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl OcrBackend for OpenAICompatibleBackend {
    async fn extract(&self, image_url: &str) -> Result<OcrExtraction> {
        let start = Instant::now();
        let image = fetch_image(&self.http_client, image_url).await?;
        let completion = self
            .vision_completion(&image.mime_type, &image.bytes)
            .await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::OcrMalformed("No response from OCR model".into()))?;
        debug!(model = %self.model, "OpenAI-compatible OCR response: {}", content);

        let response: OcrResponse = parse_json_object(&content)?;
        Ok(OcrExtraction {
            response: response.with_default_confidence(FLAT_RESPONSE_CONFIDENCE),
            model: self.model.clone(),
            duration_ms: start.elapsed().as_millis() as i64,
            usage: completion.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }

    async fn health_check(&self) -> bool {
        // Try /v1/models first (standard OpenAI endpoint)
        let mut req = self
            .http_client
            .get(format!("{}/v1/models", self.base_url));
        if let Some(ref api_key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        if let Ok(resp) = req.send().await {
            if resp.status().is_success() {
                return true;
            }
        }

        // Try /health (common for LocalAI, llama-server)
        matches!(
            self.http_client
                .get(format!("{}/health", self.base_url))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
