//! Thin HTTP surface over the answer pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer an emergency query with a safety-gated checklist |
//! | `POST` | `/document/view` | Resolve a citation for the document viewer |
//! | `GET`  | `/health` | Component status |
//!
//! The pipeline itself never surfaces raw internal errors: a request
//! resolves to an allowed checklist, a safe-fallback checklist, or an
//! explicit blocked response with the critic's reasons.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::browser::{BrowserTool, OpenResponse};
use crate::checklist::{ChecklistStep, ResponseMeta};
use crate::critic::{CriticStatus, SafetyCritic};
use crate::engine::Engine;
use crate::policy::EMERGENCY_BANNER;
use crate::store::CorpusStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: CorpusStore,
    browser: BrowserTool,
    engine: Arc<Engine>,
    critic: Arc<SafetyCritic>,
}

/// Start the HTTP server. Runs until the process is terminated.
pub async fn run_server(
    bind: &str,
    store: CorpusStore,
    browser: BrowserTool,
    engine: Arc<Engine>,
    critic: Arc<SafetyCritic>,
) -> anyhow::Result<()> {
    let state = AppState {
        store,
        browser,
        engine,
        critic,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/document/view", post(handle_document_view))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind, "server listening");
    println!("lantern server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    conversation_id: String,
    checklist: Vec<ChecklistStep>,
    meta: ResponseMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    emergency_banner: Option<String>,
    blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_reason: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = state.engine.process_query(&request.query).await;
    let decision = state.critic.review(&response);

    if decision.status == CriticStatus::Block {
        let mut meta = ResponseMeta::default();
        meta.extra.insert(
            "blocked_message".to_string(),
            serde_json::Value::String(
                "Response blocked for safety reasons. Please contact emergency services \
                 if this is urgent."
                    .to_string(),
            ),
        );
        return Ok(Json(ChatResponse {
            conversation_id,
            checklist: Vec::new(),
            meta,
            emergency_banner: decision
                .requires_emergency_banner
                .then(|| EMERGENCY_BANNER.to_string()),
            blocked: true,
            block_reason: Some(decision.reasons.join("; ")),
        }));
    }

    Ok(Json(ChatResponse {
        conversation_id,
        checklist: response.checklist,
        meta: response.meta,
        emergency_banner: decision
            .requires_emergency_banner
            .then(|| EMERGENCY_BANNER.to_string()),
        blocked: false,
        block_reason: None,
    }))
}

// ============ POST /document/view ============

#[derive(Deserialize)]
struct DocumentViewRequest {
    doc_id: String,
    start_offset: i64,
    end_offset: i64,
}

#[derive(Serialize)]
struct DocumentViewResponse {
    doc_id: String,
    doc_title: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<crate::browser::OpenLocation>,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_document_view(
    State(state): State<AppState>,
    Json(request): Json<DocumentViewRequest>,
) -> Json<DocumentViewResponse> {
    let response = state
        .browser
        .open(&request.doc_id, request.start_offset, request.end_offset)
        .await;

    Json(match response {
        OpenResponse::Success {
            doc_id,
            doc_title,
            text,
            location,
            ..
        } => DocumentViewResponse {
            doc_id,
            doc_title,
            text,
            location: Some(location),
            success: true,
            error: None,
        },
        OpenResponse::Error { doc_id, error, .. } => DocumentViewResponse {
            doc_id,
            doc_title: "Unknown".to_string(),
            text: String::new(),
            location: None,
            success: false,
            error: Some(error),
        },
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    components: serde_json::Map<String, serde_json::Value>,
    offline_mode: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut components = serde_json::Map::new();

    match state.store.stats().await {
        Ok(stats) => {
            components.insert(
                "corpus_db".to_string(),
                serde_json::Value::String(format!("healthy ({} documents)", stats.documents)),
            );
        }
        Err(e) => {
            components.insert(
                "corpus_db".to_string(),
                serde_json::Value::String(format!("error: {}", e)),
            );
        }
    }

    components.insert(
        "llm_backend".to_string(),
        serde_json::Value::String(
            state
                .engine
                .backend_name()
                .unwrap_or("unavailable (template-only)")
                .to_string(),
        ),
    );
    components.insert(
        "safety_critic".to_string(),
        serde_json::Value::String("healthy".to_string()),
    );

    let degraded = components
        .values()
        .any(|v| v.as_str().map(|s| s.starts_with("error")).unwrap_or(false));

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        components,
        offline_mode: true,
    })
}
