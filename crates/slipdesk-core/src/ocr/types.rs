//! OCR gateway response types
//!
//! The OCR service wraps most fields in a `{confidence, value}` envelope with
//! confidence on a 0..100 scale. Fields may be absent, null, or (from some
//! model variants) bare values without an envelope; all three deserialize.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A field value paired with the OCR engine's confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confident<T> {
    /// 0..100; None when the upstream sent a bare value
    pub confidence: Option<f64>,
    pub value: Option<T>,
}

impl<T> Confident<T> {
    pub fn new(value: T, confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
            value: Some(value),
        }
    }
}

impl<'de, T> Deserialize<'de> for Confident<T>
where
    T: DeserializeOwned,
{
    /// An unreadable value leaves the field empty rather than failing the payload
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(mut map) => Confident {
                confidence: map.remove("confidence").and_then(read_value),
                value: map.remove("value").and_then(read_value),
            },
            bare => Confident {
                confidence: None,
                value: read_value(bare),
            },
        })
    }
}

/// Decode a field value, treating null and unreadable values as absent
fn read_value<T: DeserializeOwned>(value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Optional scalar that tolerates a value of the wrong type
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(read_value(Value::deserialize(deserializer)?))
}

/// Numeric OCR value; accepts JSON numbers and numeric strings like "R 141,13"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number(pub f64);

impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(Number(n)),
            Repr::Text(s) => parse_amount(&s)
                .map(Number)
                .ok_or_else(|| serde::de::Error::custom(format!("not a number: {:?}", s))),
        }
    }
}

/// Parse a printed amount, tolerating currency symbols and a decimal comma
fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    let cleaned = if cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };
    cleaned.parse().ok()
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Value of an optional text envelope, trimmed, empty treated as absent
pub(crate) fn text(field: &Option<Confident<String>>) -> Option<&str> {
    field
        .as_ref()
        .and_then(|f| f.value.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Value of an optional numeric envelope
pub(crate) fn number(field: &Option<Confident<Number>>) -> Option<f64> {
    field
        .as_ref()
        .and_then(|f| f.value)
        .map(|n| n.0)
        .filter(|n| n.is_finite())
}

/// Receipt line as read by the OCR engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrProduct {
    pub line: Option<i64>,
    pub product_name: Option<Confident<String>>,
    pub description: Option<Confident<String>>,
    /// Raw slip description as printed
    pub rsd: Option<RawDescription>,
    #[serde(alias = "quantity")]
    pub qty: Option<Confident<Number>>,
    #[serde(alias = "unitPrice", alias = "unit_price")]
    pub price: Option<Confident<Number>>,
    #[serde(rename = "totalPrice", alias = "total_price")]
    pub total_price: Option<Confident<Number>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDescription {
    pub confidence: Option<f64>,
    pub value: Option<String>,
    pub original_case_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPayment {
    pub method: Option<Confident<String>>,
    pub amount: Option<Confident<Number>>,
}

/// Full OCR gateway payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrResponse {
    pub banner_id: Option<serde_json::Value>,
    #[serde(alias = "merchant", alias = "retailerCandidate", alias = "retailer")]
    pub merchant_detection_sources: Option<Confident<String>>,
    pub raw_trip_header: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub raw_text_array: Vec<String>,
    pub date: Option<Confident<String>>,
    pub time: Option<Confident<String>>,
    pub total: Option<Confident<Number>>,
    #[serde(
        rename = "paymentMethods",
        alias = "payment_methods",
        deserialize_with = "null_as_default"
    )]
    pub payment_methods: Vec<OcrPayment>,
    #[serde(alias = "items", deserialize_with = "null_as_default")]
    pub products: Vec<OcrProduct>,
    #[serde(deserialize_with = "lenient")]
    pub is_blurry: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub is_screen: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub is_receipt: Option<bool>,
    #[serde(rename = "isDigital", deserialize_with = "lenient")]
    pub is_digital: Option<bool>,
    #[serde(rename = "isFraudulent", deserialize_with = "lenient")]
    pub is_fraudulent: Option<bool>,
    /// Overall confidence, 0..100
    #[serde(deserialize_with = "lenient")]
    pub ocr_confidence: Option<f64>,

    // Enrichment some model variants return
    pub store_branch: Option<Confident<String>>,
    pub vat_amount: Option<Confident<Number>>,
    pub till_number: Option<Confident<String>>,
    pub receipt_number: Option<Confident<String>>,
    pub barcode_data: Option<Confident<String>>,
    #[serde(deserialize_with = "lenient")]
    pub fraud_risk_score: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub fraud_flags: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub is_direct_photo: Option<bool>,
    pub recommended_action: Option<String>,
}

impl OcrResponse {
    /// Overall extraction confidence in 0..1
    ///
    /// Uses `ocr_confidence` when present, else the mean of the envelope
    /// confidences on the headline fields.
    pub fn extraction_confidence(&self) -> Option<f64> {
        if let Some(c) = self.ocr_confidence {
            return Some((c / 100.0).clamp(0.0, 1.0));
        }

        let confidences: Vec<f64> = [
            self.merchant_detection_sources.as_ref().and_then(|f| f.confidence),
            self.date.as_ref().and_then(|f| f.confidence),
            self.time.as_ref().and_then(|f| f.confidence),
            self.total.as_ref().and_then(|f| f.confidence),
        ]
        .into_iter()
        .flatten()
        .collect();

        if confidences.is_empty() {
            return None;
        }
        let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
        Some((mean / 100.0).clamp(0.0, 1.0))
    }

    /// Give every present envelope without a confidence the given one
    ///
    /// Backends that ask a generative model for flat JSON get bare values back;
    /// they are stamped with a fixed confidence here.
    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        fn stamp<T>(field: &mut Option<Confident<T>>, confidence: f64) {
            if let Some(f) = field {
                f.confidence.get_or_insert(confidence);
            }
        }

        stamp(&mut self.merchant_detection_sources, confidence);
        stamp(&mut self.date, confidence);
        stamp(&mut self.time, confidence);
        stamp(&mut self.total, confidence);
        stamp(&mut self.store_branch, confidence);
        stamp(&mut self.vat_amount, confidence);
        stamp(&mut self.till_number, confidence);
        stamp(&mut self.receipt_number, confidence);
        stamp(&mut self.barcode_data, confidence);
        for payment in &mut self.payment_methods {
            stamp(&mut payment.method, confidence);
            stamp(&mut payment.amount, confidence);
        }
        for product in &mut self.products {
            stamp(&mut product.product_name, confidence);
            stamp(&mut product.description, confidence);
            stamp(&mut product.qty, confidence);
            stamp(&mut product.price, confidence);
            stamp(&mut product.total_price, confidence);
        }
        self
    }
}

/// Token counts reported by the model service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of one OCR gateway call
#[derive(Debug, Clone)]
pub struct OcrExtraction {
    pub response: OcrResponse,
    pub model: String,
    pub duration_ms: i64,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_forms() {
        let json = r#"{
            "merchant_detection_sources": {"confidence": 97, "value": "SPAR"},
            "date": "01.12.25",
            "time": null,
            "total": {"confidence": 88, "value": "R 141,13"}
        }"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();

        assert_eq!(text(&response.merchant_detection_sources), Some("SPAR"));
        assert_eq!(
            response.merchant_detection_sources.as_ref().unwrap().confidence,
            Some(97.0)
        );
        assert_eq!(text(&response.date), Some("01.12.25"));
        assert!(response.time.is_none());
        assert_eq!(number(&response.total), Some(141.13));
    }

    #[test]
    fn test_empty_envelope_and_aliases() {
        let json = r#"{
            "merchant": {"confidence": 10},
            "items": [{"description": "BUBBLES", "qty": 1, "unitPrice": 12.99}],
            "paymentMethods": [{"method": {"confidence": 90, "value": "Cash"}, "amount": 141.1}]
        }"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();

        assert_eq!(text(&response.merchant_detection_sources), None);
        assert_eq!(response.products.len(), 1);
        assert_eq!(number(&response.products[0].price), Some(12.99));
        assert_eq!(number(&response.payment_methods[0].amount), Some(141.1));
    }

    #[test]
    fn test_null_lists_are_empty() {
        let json = r#"{"products": null, "fraud_flags": null, "paymentMethods": null}"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();
        assert!(response.products.is_empty());
        assert!(response.fraud_flags.is_empty());
        assert!(response.payment_methods.is_empty());
    }

    #[test]
    fn test_unreadable_values_are_left_empty() {
        let json = r#"{
            "merchant": {"confidence": 95, "value": "SPAR"},
            "total": {"confidence": 20, "value": "N/A"},
            "items": [{"description": "BREAD", "quantity": "", "unitPrice": 18.99}],
            "paymentMethods": [{"method": "Card", "amount": {"value": "--"}}],
            "ocr_confidence": "high",
            "is_blurry": "maybe"
        }"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();

        assert_eq!(text(&response.merchant_detection_sources), Some("SPAR"));
        let total = response.total.as_ref().unwrap();
        assert_eq!(total.confidence, Some(20.0));
        assert_eq!(total.value, None);
        assert_eq!(number(&response.products[0].qty), None);
        assert_eq!(number(&response.products[0].price), Some(18.99));
        assert_eq!(number(&response.payment_methods[0].amount), None);
        assert_eq!(response.ocr_confidence, None);
        assert_eq!(response.is_blurry, None);
    }

    #[test]
    fn test_top_level_garbage_still_fails() {
        assert!(serde_json::from_str::<OcrResponse>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<OcrResponse>("not json").is_err());
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount("141.13"), Some(141.13));
        assert_eq!(parse_amount("R141,13"), Some(141.13));
        assert_eq!(parse_amount("1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_extraction_confidence() {
        let mut response = OcrResponse {
            total: Some(Confident::new(Number(10.0), 80.0)),
            date: Some(Confident::new("2025-01-01".to_string(), 60.0)),
            ..Default::default()
        };
        assert_eq!(response.extraction_confidence(), Some(0.7));

        response.ocr_confidence = Some(95.0);
        assert_eq!(response.extraction_confidence(), Some(0.95));

        assert_eq!(OcrResponse::default().extraction_confidence(), None);
    }

    #[test]
    fn test_default_confidence_only_fills_gaps() {
        let json = r#"{
            "retailer": "Checkers",
            "total": {"confidence": 40, "value": 99.0},
            "items": [{"description": "MILK 2L", "quantity": 2, "unitPrice": 30.0}]
        }"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();
        let response = response.with_default_confidence(90.0);

        assert_eq!(
            response.merchant_detection_sources.unwrap().confidence,
            Some(90.0)
        );
        assert_eq!(response.total.unwrap().confidence, Some(40.0));
        assert_eq!(response.products[0].qty.as_ref().unwrap().confidence, Some(90.0));
        assert!(response.date.is_none());
    }

    #[test]
    fn test_serialized_form_reparses() {
        let response = OcrResponse {
            total: Some(Confident::new(Number(5.5), 90.0)),
            is_receipt: Some(true),
            ..Default::default()
        };
        let value = serde_json::to_value(&response).unwrap();
        let back: OcrResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, response);
    }
}
