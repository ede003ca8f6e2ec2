#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use futures_util::stream::{self, StreamExt};
use persona_relay::db::DbPool;
use persona_relay::{AppState, RelayConfig};
use std::sync::{Arc, Mutex};

/// What the fake provider saw on its last call.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub path: String,
    pub api_key: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct Script {
    status: StatusCode,
    parts: Vec<String>,
    hang_after: bool,
    seen: Arc<Mutex<Option<Captured>>>,
}

pub struct FakeProvider {
    pub base_url: String,
    seen: Arc<Mutex<Option<Captured>>>,
}

impl FakeProvider {
    pub fn captured(&self) -> Option<Captured> {
        self.seen.lock().unwrap().clone()
    }
}

async fn provider_handler(
    State(script): State<Script>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    *script.seen.lock().unwrap() = Some(Captured {
        path: uri.to_string(),
        api_key: headers
            .get("x-goog-api-key")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or_default(),
    });

    if !script.status.is_success() {
        return (script.status, r#"{"error":{"message":"quota"}}"#).into_response();
    }

    let parts = stream::iter(
        script
            .parts
            .into_iter()
            .map(|p| Ok::<_, std::io::Error>(Bytes::from(p))),
    );
    if script.hang_after {
        Body::from_stream(parts.chain(stream::pending())).into_response()
    } else {
        Body::from_stream(parts).into_response()
    }
}

/// Serves `parts` as separate body frames on any `streamGenerateContent` call.
pub async fn spawn_provider(status: StatusCode, parts: Vec<String>) -> FakeProvider {
    spawn_provider_with(status, parts, false).await
}

/// Like [`spawn_provider`] but never ends the body after the scripted parts.
pub async fn spawn_hanging_provider(parts: Vec<String>) -> FakeProvider {
    spawn_provider_with(StatusCode::OK, parts, true).await
}

async fn spawn_provider_with(
    status: StatusCode,
    parts: Vec<String>,
    hang_after: bool,
) -> FakeProvider {
    let seen = Arc::new(Mutex::new(None));
    let script = Script {
        status,
        parts,
        hang_after,
        seen: seen.clone(),
    };
    let app = Router::new()
        .route("/v1beta/models/*rest", post(provider_handler))
        .with_state(script);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeProvider {
        base_url: format!("http://{}", addr),
        seen,
    }
}

pub async fn test_db() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = persona_relay::db::init_db(dir.path().join("relay.db"))
        .await
        .unwrap();
    (dir, pool)
}

pub fn relay_app(upstream_base_url: &str, db: DbPool) -> Router {
    let config = RelayConfig::new("AIza-test-key", "gemini-2.0-flash", upstream_base_url);
    let state = Arc::new(AppState::new(reqwest::Client::new(), config, db));
    persona_relay::server::build_router(state, None, 1024 * 1024)
}

/// Runs the relay on a real socket and returns its base URL.
pub async fn spawn_relay(upstream_base_url: &str, db: DbPool) -> String {
    let app = relay_app(upstream_base_url, db);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn sse(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    )
}
