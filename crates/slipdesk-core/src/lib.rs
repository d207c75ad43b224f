//! Slipdesk Core Library
//!
//! Shared functionality for the Slipdesk till-slip moderation pipeline:
//! - Normalization of retailer names, dates and amounts
//! - Pluggable OCR backends (Gemini, OpenAI-compatible) with retry
//! - Mapping OCR envelopes to flat receipts and the export contract
//! - Duplicate fingerprinting, validation and fraud scoring
//! - Moderation state machine and audit trail
//! - SQLite persistence with a change feed
//! - Ingestion pipeline, bulk worker pool and dashboard aggregates

#![recursion_limit = "256"]

pub mod bulk;
pub mod config;
pub mod db;
pub mod duplicate;
pub mod error;
pub mod events;
pub mod mapper;
pub mod models;
pub mod moderation;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod scoring;

/// Test utilities including mock OCR server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bulk::{BulkControl, BulkIngest, BulkItemResult, BulkItemState, BulkOptions, BulkReport};
pub use config::{MissingDatePolicy, PipelineConfig, RiskBands};
pub use db::{DashboardStats, Database};
pub use duplicate::{check_duplicate, DuplicateCheck, Fingerprint, FingerprintLookup};
pub use error::{Error, Result};
pub use events::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeOp, ChangeTable, Subscription};
pub use mapper::{export_receipt, export_slip, map_ocr_response};
pub use moderation::{Corrections, ModeratorAction, REJECTION_REASONS};
pub use ocr::{OcrBackend, OcrClient, OcrExtraction, OcrResponse, RetryPolicy};
pub use pipeline::{IngestOutcome, Pipeline, ReconcileReport};
pub use scoring::{analyze_flags, FraudAnalysis, FraudAssessment, RiskBand, ValidationReport};
