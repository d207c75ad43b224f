//! Error types for Slipdesk

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The OCR service answered with something that is not a JSON object
    #[error("Failed to parse OCR response: {0}")]
    OcrMalformed(String),

    #[error("OCR service error {status}: {message}")]
    OcrUpstream {
        status: u16,
        message: String,
        transient: bool,
    },

    #[error("OCR service rejected credentials: {0}")]
    OcrAuth(String),

    #[error("OCR service quota exhausted: {0}")]
    OcrQuota(String),

    #[error("Cannot {action} a slip in status '{from}'")]
    InvalidTransition { from: String, action: String },

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Whether retrying the same OCR request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::OcrUpstream { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this error came from the OCR gateway rather than local processing
    pub fn is_ocr(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::OcrMalformed(_)
                | Error::OcrUpstream { .. }
                | Error::OcrAuth(_)
                | Error::OcrQuota(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
