//! HTTP surface for the query interface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/answer` | `{question, history}` → `{answer}` |
//! | `GET`  | `/health` | Health check with version and index size |
//!
//! The server is stateless between requests: the client sends the whole
//! conversation history with every question, and nothing is remembered.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `answer_failed` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat page
//! served from elsewhere can call the API.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::models::ConversationTurn;
use crate::query::QueryEngine;

#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
}

/// Build the router; exposed so tests can drive it without a socket.
pub fn router(engine: Arc<QueryEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/answer", post(handle_answer))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve on `bind` until the process is terminated.
pub async fn run_server(bind: &str, engine: Arc<QueryEngine>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "query server listening");
    axum::serve(listener, router(engine)).await?;
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn answer_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "answer_failed",
        message: message.into(),
    }
}

// ============ POST /answer ============

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
}

async fn handle_answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    match state.engine.answer(question, &req.history).await {
        Ok(answer) => Ok(Json(AnswerResponse { answer })),
        Err(e) => {
            error!(error = %format!("{:#}", e), "answer failed");
            Err(answer_failed(format!("{:#}", e)))
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: String,
    passages: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = state.engine.index();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index: index.manifest().name.clone(),
        passages: index.len(),
    })
}
