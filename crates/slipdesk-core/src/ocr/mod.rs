//! OCR gateway abstraction
//!
//! Turns a slip image reference into the OCR service's confidence-annotated
//! JSON payload.
//!
//! # Architecture
//!
//! - `OcrBackend` trait: the interface every extraction service implements
//! - `OcrClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `GeminiBackend`, `OpenAICompatibleBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `OCR_BACKEND`: Backend to use (gemini, openai_compatible, mock). Default: gemini
//! - `GEMINI_API_KEY`: API key for the gemini backend (mock is used when unset)
//! - `GEMINI_MODEL`: Model name (default: gemini-2.0-flash)
//! - `OCR_HOST`: Server URL (required for openai_compatible backend)
//! - `OCR_MODEL`: Model name for openai_compatible (default: gpt-4o-mini)
//! - `OCR_API_KEY`: API key if required (optional)

mod gemini;
mod mock;
mod openai_compatible;
pub mod parsing;
mod retry;
pub mod types;

pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use retry::RetryPolicy;
pub use types::*;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use self::parsing::classify_upstream_error;

/// Instructions sent with every slip image
pub const EXTRACTION_PROMPT: &str = r#"You are reading a photo of a South African till slip.
Return ONLY a JSON object with these keys:
{
  "retailer": string,
  "store_branch": string or null,
  "date": string (as printed),
  "time": string (HH:MM),
  "total": number,
  "vat_amount": number or null,
  "till_number": string or null,
  "receipt_number": string or null,
  "paymentMethods": [{"method": string, "amount": number}],
  "items": [{"description": string, "quantity": number, "unitPrice": number, "totalPrice": number}],
  "is_blurry": boolean,
  "is_screen": boolean,
  "is_receipt": boolean,
  "is_direct_photo": boolean,
  "fraud_risk_score": number between 0 and 1,
  "fraud_flags": [string],
  "recommended_action": "AUTO_APPROVE" | "AUTO_REJECT" | "MANUAL_REVIEW"
}
Use null for anything you cannot read. Do not guess amounts."#;

/// Confidence assigned to values from backends that return bare JSON
pub const FLAT_RESPONSE_CONFIDENCE: f64 = 90.0;

/// Trait implemented by every OCR extraction service
///
/// Backends should be Send + Sync to allow use across worker tasks.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Extract structured fields from the slip image at `image_url`
    async fn extract(&self, image_url: &str) -> Result<OcrExtraction>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Get the model name (recorded on each slip)
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete OCR client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum OcrClient {
    Gemini(GeminiBackend),
    /// Any server speaking the OpenAI chat completions API with vision support
    OpenAICompatible(OpenAICompatibleBackend),
    Mock(MockBackend),
}

impl OcrClient {
    /// Create an OCR client from environment variables
    ///
    /// Returns None only when `openai_compatible` is selected without `OCR_HOST`.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("OCR_BACKEND").unwrap_or_else(|_| "gemini".to_string());

        match backend.to_lowercase().as_str() {
            "gemini" => match GeminiBackend::from_env() {
                Some(b) => Some(OcrClient::Gemini(b)),
                None => {
                    warn!("GEMINI_API_KEY not set, using mock OCR backend");
                    Some(OcrClient::Mock(MockBackend::new()))
                }
            },
            "openai_compatible" | "openai" | "vllm" | "localai" => {
                OpenAICompatibleBackend::from_env().map(OcrClient::OpenAICompatible)
            }
            "mock" => Some(OcrClient::Mock(MockBackend::new())),
            _ => {
                warn!(backend = %backend, "Unknown OCR_BACKEND, falling back to mock");
                Some(OcrClient::Mock(MockBackend::new()))
            }
        }
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        OcrClient::Mock(MockBackend::new())
    }

    /// Extract with bounded retries for transient upstream failures
    pub async fn extract_with_retry(
        &self,
        image_url: &str,
        policy: &RetryPolicy,
    ) -> Result<OcrExtraction> {
        policy.run(image_url, || self.extract(image_url)).await
    }
}

#[async_trait]
impl OcrBackend for OcrClient {
    async fn extract(&self, image_url: &str) -> Result<OcrExtraction> {
        match self {
            OcrClient::Gemini(b) => b.extract(image_url).await,
            OcrClient::OpenAICompatible(b) => b.extract(image_url).await,
            OcrClient::Mock(b) => b.extract(image_url).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            OcrClient::Gemini(b) => b.health_check().await,
            OcrClient::OpenAICompatible(b) => b.health_check().await,
            OcrClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            OcrClient::Gemini(b) => b.model(),
            OcrClient::OpenAICompatible(b) => b.model(),
            OcrClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            OcrClient::Gemini(b) => b.host(),
            OcrClient::OpenAICompatible(b) => b.host(),
            OcrClient::Mock(b) => b.host(),
        }
    }
}

/// Slip image bytes with their MIME type
pub(crate) struct SlipImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Load a slip image from an http(s) URL or a local path
pub(crate) async fn fetch_image(client: &Client, image_url: &str) -> Result<SlipImage> {
    if image_url.starts_with("http://") || image_url.starts_with("https://") {
        debug!(url = %image_url, "Fetching slip image");
        let response = client.get(image_url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upstream_error(status, &body));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_path(image_url).to_string());
        let bytes = response.bytes().await?.to_vec();
        return Ok(SlipImage { bytes, mime_type });
    }

    let path = image_url.strip_prefix("file://").unwrap_or(image_url);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::InvalidData(format!("Cannot read image {}: {}", path, e)))?;
    Ok(SlipImage {
        bytes,
        mime_type: mime_from_path(path).to_string(),
    })
}

fn mime_from_path(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    let lower = lower.split('?').next().unwrap_or_default();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".heic") {
        "image/heic"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path("slip.PNG"), "image/png");
        assert_eq!(mime_from_path("https://cdn/x.webp?sig=1"), "image/webp");
        assert_eq!(mime_from_path("photo"), "image/jpeg");
    }

    #[tokio::test]
    async fn test_fetch_local_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slip.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = fetch_image(&Client::new(), path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.mime_type, "image/png");

        let missing = fetch_image(&Client::new(), "/nonexistent/slip.jpg").await;
        assert!(matches!(missing, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_mock_client_dispatch() {
        let client = OcrClient::mock();
        assert!(client.health_check().await);
        assert_eq!(client.model(), "mock");

        let extraction = client
            .extract_with_retry("https://example.com/slip.jpg", &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(extraction.model, "mock");
    }
}
