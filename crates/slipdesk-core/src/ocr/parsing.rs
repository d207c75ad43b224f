//! Parsing helpers for OCR model output
//!
//! Generative models often wrap the JSON payload in markdown fences or add
//! text before/after it. Anything that does not yield a JSON object is a hard
//! failure.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

const MAX_RAW_IN_ERROR: usize = 200;

fn truncate(s: &str) -> String {
    if s.len() > MAX_RAW_IN_ERROR {
        let mut end = MAX_RAW_IN_ERROR;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}

/// Remove ```json ... ``` fences around a model reply
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract and deserialize the JSON object embedded in a model reply
pub fn parse_json_object<T: DeserializeOwned>(response: &str) -> Result<T> {
    let response = strip_code_fences(response);
    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                Error::OcrMalformed(format!("{} | Raw: {}", e, truncate(json_str)))
            })
        }
        _ => Err(Error::OcrMalformed(format!(
            "No JSON found in OCR response | Raw: {}",
            truncate(response)
        ))),
    }
}

/// Map a non-success upstream HTTP status to the error taxonomy
pub fn classify_upstream_error(status: u16, body: &str) -> Error {
    let lowered = body.to_lowercase();
    match status {
        401 | 403 => Error::OcrAuth(format!("status {}: {}", status, truncate(body))),
        429 if lowered.contains("quota") || lowered.contains("resource_exhausted") => {
            Error::OcrQuota(truncate(body))
        }
        429 | 500..=599 => Error::OcrUpstream {
            status,
            message: truncate(body),
            transient: true,
        },
        _ => Error::OcrUpstream {
            status,
            message: truncate(body),
            transient: false,
        },
    }
}
