//! Transcript and personality endpoints. All of them are scoped to the
//! caller's owner id.

use crate::db;
use crate::export::{self, ExportFormat};
use crate::personalities::{self, NewPersonality, Personality};
use crate::server::owner_from_headers;
use crate::types::*;
use crate::AppState;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    #[serde(default = "default_personality")]
    pub personality_id: String,
    #[serde(default)]
    pub first_message: Option<String>,
}

fn default_personality() -> String {
    "helpful".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RenameChat {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

pub async fn list_personalities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Personality>>> {
    let owner = owner_from_headers(&headers);
    Ok(Json(personalities::list_for_owner(&state.db, &owner).await?))
}

pub async fn create_personality(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewPersonality>,
) -> Result<(StatusCode, Json<Personality>)> {
    let owner = owner_from_headers(&headers);
    let created = db::create_custom_personality(&state.db, &owner, &new).await?;
    tracing::info!("Created personality {} for {}", created.id, owner);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_personality(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if personalities::find_builtin(&id).is_some() {
        return Err(RelayError::InvalidRequest(format!("{} is a built-in personality", id)).into());
    }
    let owner = owner_from_headers(&headers);
    db::delete_custom_personality(&state.db, &owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<db::Chat>>> {
    let owner = owner_from_headers(&headers);
    Ok(Json(db::list_chats(&state.db, &owner).await?))
}

pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewChat>,
) -> Result<(StatusCode, Json<db::Chat>)> {
    let owner = owner_from_headers(&headers);
    let first = new.first_message.as_deref().filter(|m| !m.trim().is_empty());
    let chat = db::create_chat(&state.db, &owner, &new.personality_id, first).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn clear_chats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let owner = owner_from_headers(&headers);
    let deleted = db::clear_chats(&state.db, &owner).await?;
    tracing::info!("Cleared {} chats for {}", deleted, owner);
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn rename_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RenameChat>,
) -> Result<Json<db::Chat>> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(RelayError::InvalidRequest("title must not be empty".to_string()).into());
    }
    let owner = owner_from_headers(&headers);
    db::update_chat_title(&state.db, &owner, &id, title).await?;
    Ok(Json(db::get_chat(&state.db, &owner, &id).await?))
}

pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let owner = owner_from_headers(&headers);
    db::delete_chat(&state.db, &owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<NewMessage>,
) -> Result<(StatusCode, Json<db::ChatMessage>)> {
    let owner = owner_from_headers(&headers);
    let message = db::add_message(&state.db, &owner, &id, body.role, &body.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn export_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let owner = owner_from_headers(&headers);
    let chat = db::get_chat(&state.db, &owner, &id).await?;
    let personality = personalities::resolve(&state.db, &owner, &chat.personality_id).await?;

    let body = export::render(&chat, query.format, personality.as_ref().map(|p| p.name.as_str()));
    let disposition = export::content_disposition(&chat.title, query.format);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, query.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
