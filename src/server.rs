//! HTTP surface: link submission and queue counts.

use crate::storage::LinkStore;
use crate::worker::BatchTrigger;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LinkStore>,
    pub trigger: BatchTrigger,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    email: Option<String>,
}

fn cors(methods: [Method; 2]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/submit-link",
            post(submit_link)
                .options(preflight)
                .layer(cors([Method::POST, Method::OPTIONS])),
        )
        .route(
            "/queue-count",
            get(queue_count)
                .options(preflight)
                .layer(cors([Method::GET, Method::OPTIONS])),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn submit_link(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let req: SubmitRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "error decoding request body");
            return StatusCode::BAD_REQUEST;
        }
    };
    info!(url = %req.url, email = %req.email, "received link");

    if req.url.trim().is_empty() || req.email.trim().is_empty() {
        warn!(url = %req.url, email = %req.email, "missing required fields");
        return StatusCode::BAD_REQUEST;
    }

    // Storage and dispatch failures never reach the submitter
    let email = req.email.clone();
    let stored = tokio::task::spawn_blocking(move || store_and_trigger(&state, &req)).await;
    if let Err(e) = stored {
        error!(email = %email, error = %e, "link storage task failed");
    }
    StatusCode::OK
}

/// Blocking part of a submission: file or sled I/O under the per-email lock
fn store_and_trigger(state: &AppState, req: &SubmitRequest) {
    match state.store.append(&req.email, &req.url) {
        Ok(queue) => {
            if let Err(e) = state.trigger.on_append(&queue) {
                error!(email = %req.email, error = %e, "failed to dispatch digest");
            }
        }
        Err(e) => error!(email = %req.email, error = %e, "failed to store link"),
    }
}

async fn queue_count(State(state): State<AppState>, Query(query): Query<CountQuery>) -> Response {
    let Some(email) = query.email.filter(|e| !e.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing email").into_response();
    };
    let store = state.store.clone();
    let lookup = email.clone();
    let count = match tokio::task::spawn_blocking(move || store.count(&lookup)).await {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => {
            warn!(email = %email, error = %e, "failed to read queue, reporting empty");
            0
        }
        Err(e) => {
            error!(email = %email, error = %e, "queue count task failed");
            0
        }
    };
    Json(json!({ "count": count })).into_response()
}
