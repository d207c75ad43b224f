//! Test utilities for slipdesk-core
//!
//! A mock OCR server speaking both the Gemini `generateContent` API and the
//! OpenAI chat completions API, plus fixtures shared by integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::{NewSlip, ProcessedItem, ProcessedPayment, ProcessedReceipt, SlipStatus};

/// Smallest byte sequence that reads as a JPEG header
const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

#[derive(Clone)]
enum Reply {
    /// Model output text wrapped in the protocol envelope
    Text(String),
    /// Non-success HTTP status with a body
    Status(u16, String),
}

struct ServerState {
    reply: Mutex<Reply>,
    /// Number of upcoming calls that fail with the given status before `reply` applies
    failures: Mutex<Option<(usize, u16)>>,
    calls: AtomicUsize,
}

impl ServerState {
    fn next_reply(&self) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut failures) = self.failures.lock() {
            if let Some((remaining, status)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Reply::Status(*status, "temporarily unavailable".to_string());
                }
            }
        }
        self.reply
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|_| Reply::Status(500, "poisoned".to_string()))
    }
}

/// Mock OCR server for testing and development
pub struct MockOcrServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOcrServer {
    /// Start the mock server on an available port, replying with [`sample_reply`]
    pub async fn start() -> Self {
        let state = Arc::new(ServerState {
            reply: Mutex::new(Reply::Text(sample_reply().to_string())),
            failures: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/v1beta/models/:model", get(handle_gemini_model).post(handle_gemini_generate))
            .route("/v1/chat/completions", post(handle_chat_completions))
            .route("/v1/models", get(handle_models))
            .route("/health", get(|| async { "ok" }))
            .route("/images/:name", get(handle_image))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of a fake slip image served by this server
    pub fn image_url(&self, name: &str) -> String {
        format!("{}/images/{}", self.url(), name)
    }

    /// Reply to extraction calls with this model output text
    pub fn set_reply_text(&self, text: impl Into<String>) {
        if let Ok(mut reply) = self.state.reply.lock() {
            *reply = Reply::Text(text.into());
        }
    }

    /// Reply to extraction calls with this JSON object as model output
    pub fn set_reply(&self, value: &Value) {
        self.set_reply_text(value.to_string());
    }

    /// Answer every extraction call with an HTTP error
    pub fn fail_with(&self, status: u16, body: &str) {
        if let Ok(mut reply) = self.state.reply.lock() {
            *reply = Reply::Status(status, body.to_string());
        }
    }

    /// Fail the next `times` extraction calls with `status`, then reply normally
    pub fn fail_times(&self, times: usize, status: u16) {
        if let Ok(mut failures) = self.state.failures.lock() {
            *failures = Some((times, status));
        }
    }

    /// Extraction calls received so far
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOcrServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn error_response(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, body).into_response()
}

/// Gemini model metadata (health check)
async fn handle_gemini_model(Path(model): Path<String>) -> Json<Value> {
    Json(json!({ "name": format!("models/{}", model) }))
}

/// Gemini `models/{model}:generateContent`
async fn handle_gemini_generate(
    State(state): State<Arc<ServerState>>,
    Path(model_call): Path<String>,
) -> Response {
    if !model_call.ends_with(":generateContent") {
        return error_response(404, format!("unknown method {}", model_call));
    }
    match state.next_reply() {
        Reply::Status(status, body) => error_response(status, body),
        Reply::Text(text) => Json(json!({
            "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }],
            "usageMetadata": { "promptTokenCount": 1200, "candidatesTokenCount": 300 }
        }))
        .into_response(),
    }
}

/// OpenAI `/v1/chat/completions`
async fn handle_chat_completions(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<Value>,
) -> Response {
    match state.next_reply() {
        Reply::Status(status, body) => error_response(status, body),
        Reply::Text(text) => Json(json!({
            "model": request["model"],
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }],
            "usage": { "prompt_tokens": 1100, "completion_tokens": 250 }
        }))
        .into_response(),
    }
}

async fn handle_models() -> Json<Value> {
    Json(json!({ "data": [{ "id": "mock-vision" }] }))
}

async fn handle_image(Path(_name): Path<String>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], FAKE_JPEG)
}

/// A flat model reply for a clean Checkers slip dated 2025-12-01
pub fn sample_reply() -> Value {
    json!({
        "retailer": "Checkers Hyper",
        "store_branch": "Sea Point",
        "date": "01.12.25",
        "time": "14:32",
        "total": 89.97,
        "vat_amount": 11.74,
        "till_number": "07",
        "receipt_number": "000451",
        "paymentMethods": [{ "method": "Card", "amount": 89.97 }],
        "items": [
            { "description": "WHITE BREAD 700G", "quantity": 1, "unitPrice": 19.99, "totalPrice": 19.99 },
            { "description": "FULL CREAM MILK 2L", "quantity": 2, "unitPrice": 34.99, "totalPrice": 69.98 }
        ],
        "is_blurry": false,
        "is_screen": false,
        "is_receipt": true,
        "is_direct_photo": true,
        "fraud_risk_score": 0.05,
        "fraud_flags": [],
        "recommended_action": "AUTO_APPROVE"
    })
}

/// A mapped receipt for seeding the database directly
pub fn sample_receipt(retailer: &str, date: &str, total: f64) -> ProcessedReceipt {
    ProcessedReceipt {
        retailer: retailer.to_string(),
        date: date.to_string(),
        time: "12:00".to_string(),
        total_amount: total,
        items: vec![ProcessedItem {
            description: "BREAD".to_string(),
            quantity: 1.0,
            unit_price: total,
            total_price: total,
            discount: 0.0,
            final_price: total,
        }],
        payments: vec![ProcessedPayment {
            method: "Cash".to_string(),
            amount: total,
        }],
        is_receipt: true,
        ..Default::default()
    }
}

/// A slip ready for [`crate::db::Database::insert_slip`]
pub fn sample_new_slip(retailer: &str, date: &str, total: f64) -> NewSlip {
    let receipt = sample_receipt(retailer, date, total);
    NewSlip {
        image_url: format!("https://cdn.example.com/{}-{}.jpg", retailer.to_lowercase(), date),
        user_id: Some("user-1".to_string()),
        status: SlipStatus::ManualReview,
        ai_processing_time_ms: Some(1500),
        ai_model_used: Some("mock".to_string()),
        ai_cost_usd: Some(0.0003),
        ai_response: None,
        fingerprint: crate::duplicate::Fingerprint::of(&receipt).to_string(),
        receipt,
        approved_retailer: Some(true),
        slip_within_7_days: Some(true),
        is_valid: Some(true),
        fraud_risk_score: Some(0.1),
        fraud_risk_level: Some(crate::models::RiskLevel::Low),
        fraud_flags: Vec::new(),
        is_duplicate: false,
        duplicate_of: None,
    }
}
