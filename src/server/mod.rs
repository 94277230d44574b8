//! Inbound HTTP API
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /reddit/words/link?link=<url>` | `{link, words, success}` |
//! | `GET /reddit/words/status?link=<url>` | Progress of the thread's crawl |
//! | `GET /health` | `Healthy` |
//!
//! Errors are returned as `{message}` with a generic text; details are logged.

use crate::crawler::Coordinator;
use crate::state::JobSnapshot;
use crate::WordCloudError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Coordinator>,
}

#[derive(Debug, Deserialize)]
struct LinkQuery {
    link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WordsResponse {
    /// Thread id of the requested link
    pub link: String,
    pub words: Option<HashMap<String, u64>>,
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the application router
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reddit/words/link", get(words_handler))
        .route("/reddit/words/status", get(status_handler))
        .with_state(AppState { coordinator })
}

/// Serves the API on `listener` until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on {}", addr);
    }
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "Healthy"
}

async fn words_handler(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<WordsResponse>, ApiError> {
    let link = required_link(query)?;

    let answer = state
        .coordinator
        .thread_words(&link)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(WordsResponse {
        link: answer.thread_id().to_string(),
        words: answer.words,
        success: true,
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let link = required_link(query)?;

    match state.coordinator.job_status(&link) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(not_found("no crawl has run for this thread")),
        Err(e) => Err(error_response(&e)),
    }
}

fn required_link(query: LinkQuery) -> Result<String, ApiError> {
    match query.link {
        Some(link) if !link.trim().is_empty() => Ok(link.trim().to_string()),
        _ => Err(bad_request("missing 'link' query parameter")),
    }
}

/// Maps a crawl error onto a status code and a message safe to show callers
pub fn error_response(err: &WordCloudError) -> ApiError {
    match err {
        WordCloudError::InvalidLink(e) => bad_request(format!("invalid thread link: {}", e)),
        WordCloudError::NotFound { .. } => not_found("thread not found"),
        other => {
            tracing::error!("Request failed: {}", other);
            internal_error()
        }
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: "failed to load thread words".to_string(),
        }),
    )
}
