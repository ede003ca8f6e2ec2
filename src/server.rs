use crate::api;
use crate::constants::{DEFAULT_OWNER, OWNER_HEADER, RELAY_CHANNEL_CAPACITY};
use crate::health;
use crate::logging::exchange_id_middleware;
use crate::personalities;
use crate::projections::GeminiProjection;
use crate::streaming::{RelayOutcome, StreamHandler};
use crate::types::*;
use crate::upstream::{failure_record, open_stream};
use crate::AppState;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::Instrument;

pub fn build_router(
    state: Arc<AppState>,
    static_dir: Option<&Path>,
    max_body_size: usize,
) -> Router {
    let router = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .route(
            "/api/personalities",
            get(api::list_personalities).post(api::create_personality),
        )
        .route("/api/personalities/:id", delete(api::delete_personality))
        .route(
            "/api/chats",
            get(api::list_chats)
                .post(api::create_chat)
                .delete(api::clear_chats),
        )
        .route(
            "/api/chats/:id",
            patch(api::rename_chat).delete(api::delete_chat),
        )
        .route("/api/chats/:id/messages", post(api::add_message))
        .route("/api/chats/:id/export", get(api::export_chat));

    let router = match static_dir {
        Some(dir) => {
            tracing::info!("Serving static files from {}", dir.display());
            router.fallback_service(ServeDir::new(dir))
        }
        None => router,
    };

    router
        .layer(axum::extract::DefaultBodyLimit::max(max_body_size))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(exchange_id_middleware))
        .with_state(state)
}

/// Caller identity as set by the fronting proxy.
pub fn owner_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_OWNER)
        .to_string()
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    request.validate()?;
    let owner = owner_from_headers(&headers);

    let system_prompt = resolve_system_prompt(&state, &owner, &request).await?;
    tracing::info!(
        "[🖥️  -> ⚙️ ] Chat request: turns={} personality={} prompt={}",
        request.messages.len(),
        request.personality_id.as_deref().unwrap_or("-"),
        system_prompt.is_some()
    );

    let upstream_request = GeminiProjection::project(&request.messages, system_prompt.as_deref());

    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    let stream_span = tracing::info_span!(
        "stream",
        stream_id = %uuid::Uuid::new_v4(),
        model = %state.config.model
    );
    tokio::spawn(run_exchange(state, upstream_request, tx).instrument(stream_span));

    Ok(relay_response(rx))
}

/// An explicit prompt wins; otherwise the personality's prompt, if the id
/// resolves for this owner.
async fn resolve_system_prompt(
    state: &AppState,
    owner: &str,
    request: &ChatRequest,
) -> Result<Option<String>> {
    if let Some(prompt) = request.system_prompt.as_ref().filter(|p| !p.is_empty()) {
        return Ok(Some(prompt.clone()));
    }
    let Some(id) = request.personality_id.as_deref() else {
        return Ok(None);
    };
    match personalities::resolve(&state.db, owner, id).await? {
        Some(p) => Ok(Some(p.system_prompt)),
        None => {
            tracing::warn!("Unknown personality {:?}; sending without a system prompt", id);
            Ok(None)
        }
    }
}

async fn run_exchange(
    state: Arc<AppState>,
    request: crate::specs::gemini::GeminiRequest,
    tx: mpsc::Sender<StreamRecord>,
) {
    let response = match open_stream(&state.client, &state.config, &request).await {
        Ok(r) => r,
        Err(e) => {
            match &e.inner {
                RelayError::Upstream(status, body) => {
                    tracing::error!("[☁️  -> ⚙️ ] Upstream error {}: {}", status, body)
                }
                other => tracing::error!("[☁️  -> ⚙️ ] Upstream request failed: {}", other),
            }
            state.health.record_failure();
            if tx.send(failure_record(&e)).await.is_err() {
                tracing::trace!("Client disconnected, error record not delivered");
            }
            return;
        }
    };

    match StreamHandler::relay(Box::pin(response.bytes_stream()), tx).await {
        RelayOutcome::Completed => state.health.record_success(),
        RelayOutcome::Failed => state.health.record_failure(),
        RelayOutcome::ClientGone => {}
    }
}

/// Body of `POST /api/chat`: one encoded record per line, in channel order.
pub fn relay_response(rx: mpsc::Receiver<StreamRecord>) -> Response {
    let body = ReceiverStream::new(rx).map(|record| record.encode());
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
