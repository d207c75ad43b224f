//! Slipdesk Web Server
//!
//! Axum-based REST API over the Slipdesk ingestion pipeline and moderation
//! queue.
//!
//! Security features:
//! - API key authentication for `/api/*` (`x-api-key` or `Authorization: Bearer`)
//! - Restrictive CORS policy
//! - Input validation (pagination limits, allowed bulk concurrency)
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use slipdesk_core::{OcrBackend, Pipeline};

mod handlers;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Header carrying an API key
const API_KEY_HEADER: &str = "x-api-key";

/// Authorization header for bearer API keys
const AUTHORIZATION_HEADER: &str = "authorization";

/// Header naming the acting moderator
const MODERATOR_HEADER: &str = "x-moderator-id";

/// Moderator recorded when no identity header is sent
pub const DEFAULT_MODERATOR: &str = "local-dev";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether `/api/*` requires an API key
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Accepted API keys
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

impl ServerConfig {
    /// Read `SLIPDESK_API_KEYS` and `SLIPDESK_REQUIRE_AUTH`
    ///
    /// Auth is required whenever keys are configured unless explicitly
    /// disabled.
    pub fn from_env() -> Self {
        let api_keys = parse_api_keys(&std::env::var("SLIPDESK_API_KEYS").unwrap_or_default());
        let require_auth = match std::env::var("SLIPDESK_REQUIRE_AUTH") {
            Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
            Err(_) => !api_keys.is_empty(),
        };
        Self {
            require_auth,
            api_keys,
            ..Default::default()
        }
    }
}

/// Split a comma-separated key list, dropping blanks
pub fn parse_api_keys(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared application state
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: ServerConfig,
}

/// Authentication middleware - validates an API key from either header
///
/// Keys are compared in constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let headers = request.headers();
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(AUTHORIZATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer "))
        });

    if provided
        .map(|key| validate_api_key(key.trim(), &state.config.api_keys))
        .unwrap_or(false)
    {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid API key");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();
    valid_keys.iter().any(|key| {
        let key_bytes = key.as_bytes();
        provided_bytes.len() == key_bytes.len() && bool::from(provided_bytes.ct_eq(key_bytes))
    })
}

/// Acting moderator for audit entries
pub fn get_moderator_id(headers: &HeaderMap) -> String {
    headers
        .get(MODERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_MODERATOR)
        .to_string()
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(pipeline: Pipeline, config: ServerConfig) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        config: config.clone(),
    });

    let api_routes = Router::new()
        // Ingestion
        .route("/process-receipt", post(handlers::process_receipt))
        .route("/process-receipts/bulk", post(handlers::process_bulk))
        // Moderation queue
        .route("/slips", get(handlers::list_slips))
        .route(
            "/slips/:id",
            get(handlers::get_slip).delete(handlers::delete_slip),
        )
        .route("/slips/:id/export", get(handlers::export_slip))
        .route("/slips/:id/approve", post(handlers::approve_slip))
        .route("/slips/:id/reject", post(handlers::reject_slip))
        .route("/slips/:id/correct", post(handlers::correct_slip))
        .route("/slips/:id/escalate", post(handlers::escalate_slip))
        .route("/slips/:id/notes", post(handlers::add_note))
        .route("/rejection-reasons", get(handlers::rejection_reasons))
        // Activity
        .route("/slips/:id/activity", get(handlers::slip_activity))
        .route("/activity", get(handlers::recent_activity))
        // Dashboard
        .route("/dashboard", get(handlers::get_dashboard))
        // Live updates
        .route("/events", get(handlers::change_events));

    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let allowed_headers = [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::HeaderName::from_static(API_KEY_HEADER),
        header::HeaderName::from_static(MODERATOR_HEADER),
    ];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(allowed_headers)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(allowed_headers)
    };

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the server
pub async fn serve(pipeline: Pipeline, host: &str, port: u16) -> anyhow::Result<()> {
    serve_with_config(pipeline, host, port, ServerConfig::from_env()).await
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    pipeline: Pipeline,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    } else if config.api_keys.is_empty() {
        warn!("⚠️  Authentication required but SLIPDESK_API_KEYS is empty - every API call will be rejected");
    }

    // Repair slips whose secondary writes failed in a previous session
    match pipeline.find_incomplete() {
        Ok(incomplete) if !incomplete.is_empty() => {
            warn!(
                "⚠️  Found {} slip(s) with missing line items, reconciling",
                incomplete.len()
            );
            for slip in incomplete {
                if let Err(e) = pipeline.reconcile(slip.slip_id) {
                    warn!(slip_id = slip.slip_id, error = %e, "Failed to reconcile slip");
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to check for incomplete slips: {}", e);
        }
    }

    check_ocr_connection(&pipeline).await;

    let app = create_router(pipeline, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log OCR backend connection status
async fn check_ocr_connection(pipeline: &Pipeline) {
    let ocr = pipeline.ocr();
    if ocr.health_check().await {
        info!("✅ OCR backend connected: {} (model: {})", ocr.host(), ocr.model());
    } else {
        warn!(
            "⚠️  OCR backend configured but not responding: {} (model: {})",
            ocr.host(),
            ocr.model()
        );
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Unwrap a JSON body, reporting a malformed one as a 400 `{error}` response
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(&rejection.body_text()))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        use slipdesk_core::Error as CoreError;

        let err = err.into();
        let (status, message) = match err.downcast_ref::<CoreError>() {
            Some(CoreError::InvalidData(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            Some(CoreError::NotFound(what)) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            Some(e @ (CoreError::InvalidTransition { .. } | CoreError::Conflict(_))) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            // Upstream OCR messages are safe to show and useful to operators
            Some(e) if e.is_ocr() => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        Self {
            status,
            message,
            // Keep full error for logging
            internal: status.is_server_error().then_some(err),
        }
    }
}

#[cfg(test)]
mod tests;
