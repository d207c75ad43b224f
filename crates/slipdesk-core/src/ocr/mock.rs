//! Mock backend for testing
//!
//! Returns a canned SPAR slip for every image. Used for tests and for
//! development when no OCR credentials are configured.

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{Confident, Number, OcrExtraction, OcrPayment, OcrProduct, OcrResponse};
use super::OcrBackend;

/// Mock OCR backend
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    /// Replaces the canned slip when set
    pub response: Option<OcrResponse>,
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            response: None,
        }
    }

    /// Create an unhealthy mock backend; extraction fails like an unreachable service
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            response: None,
        }
    }

    /// Always return the given response
    pub fn with_response(response: OcrResponse) -> Self {
        Self {
            healthy: true,
            response: Some(response),
        }
    }

    /// The canned slip returned when no response is configured
    pub fn canned_slip() -> OcrResponse {
        OcrResponse {
            merchant_detection_sources: Some(Confident::new("SPAR".to_string(), 90.0)),
            date: Some(Confident::new("01/12/2025".to_string(), 90.0)),
            time: Some(Confident::new("19:00".to_string(), 90.0)),
            total: Some(Confident::new(Number(141.13), 90.0)),
            payment_methods: vec![OcrPayment {
                method: Some(Confident::new("Cash".to_string(), 90.0)),
                amount: Some(Confident::new(Number(141.1), 90.0)),
            }],
            products: vec![OcrProduct {
                line: Some(1),
                product_name: Some(Confident::new("MESSARIS BUBBLES 100GR".to_string(), 90.0)),
                qty: Some(Confident::new(Number(1.0), 90.0)),
                price: Some(Confident::new(Number(12.99), 90.0)),
                total_price: Some(Confident::new(Number(12.99), 90.0)),
                ..Default::default()
            }],
            is_blurry: Some(false),
            is_screen: Some(false),
            is_receipt: Some(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl OcrBackend for MockBackend {
    async fn extract(&self, _image_url: &str) -> Result<OcrExtraction> {
        if !self.healthy {
            return Err(Error::OcrUpstream {
                status: 503,
                message: "mock OCR backend is unhealthy".into(),
                transient: true,
            });
        }

        Ok(OcrExtraction {
            response: self.response.clone().unwrap_or_else(Self::canned_slip),
            model: "mock".to_string(),
            duration_ms: 0,
            usage: None,
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
