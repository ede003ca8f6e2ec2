use crate::constants::{DEFAULT_CHAT_TITLE, TITLE_MAX_CHARS};
use crate::personalities::{NewPersonality, Personality};
use crate::types::{RelayError, Result, Role};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow, SqliteSynchronous,
};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

pub type DbPool = SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub personality_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let options = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(RelayError::Database)?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        return Err(RelayError::Internal(
            format!("Migration failed: {}", e),
            tracing_error::SpanTrace::capture(),
        )
        .into());
    }

    verify_schema_version(&pool).await;
    Ok(pool)
}

async fn verify_schema_version(pool: &DbPool) {
    let version_row: std::result::Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(pool)
            .await;

    match version_row {
        Ok((version,)) => {
            tracing::info!("Database initialized. Schema version: {}", version);
        }
        Err(e) => {
            tracing::warn!("Could not verify schema version: {}", e);
        }
    }
}

/// Chat titles are the first 30 characters of the opening message.
pub fn generate_title(message: &str) -> String {
    let prefix = crate::str_utils::prefix_chars(message, TITLE_MAX_CHARS);
    if prefix.len() < message.len() {
        format!("{}...", prefix)
    } else {
        message.to_string()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(e) => Err(RelayError::Internal(
            format!("Corrupt timestamp {:?}: {}", raw, e),
            tracing_error::SpanTrace::capture(),
        )
        .into()),
    }
}

fn chat_from_row(row: &SqliteRow) -> Result<Chat> {
    Ok(Chat {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        personality_id: row.try_get("personality_id")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?,
        messages: Vec::new(),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.try_get("role")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        role: role.parse()?,
        content: row.try_get("content")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

pub async fn create_chat(
    pool: &DbPool,
    owner: &str,
    personality_id: &str,
    first_message: Option<&str>,
) -> Result<Chat> {
    let now = Utc::now();
    let chat_id = Uuid::new_v4().to_string();
    let title = match first_message {
        Some(m) => generate_title(m),
        None => DEFAULT_CHAT_TITLE.to_string(),
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO chats (id, owner_id, title, personality_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&chat_id)
    .bind(owner)
    .bind(&title)
    .bind(personality_id)
    .bind(timestamp(now))
    .bind(timestamp(now))
    .execute(&mut *tx)
    .await?;

    let mut messages = Vec::new();
    if let Some(content) = first_message {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.clone(),
            role: Role::User,
            content: content.to_string(),
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO chat_messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;
        messages.push(message);
    }
    tx.commit().await?;

    tracing::debug!("Created chat {} for {}", chat_id, owner);
    Ok(Chat {
        id: chat_id,
        owner_id: owner.to_string(),
        title,
        personality_id: personality_id.to_string(),
        created_at: now,
        updated_at: now,
        messages,
    })
}

/// Newest-updated first, each with its messages oldest first.
pub async fn list_chats(pool: &DbPool, owner: &str) -> Result<Vec<Chat>> {
    let chat_rows = sqlx::query(
        "SELECT * FROM chats WHERE owner_id = ? ORDER BY updated_at DESC, rowid DESC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;

    let message_rows = sqlx::query(
        "SELECT m.* FROM chat_messages m JOIN chats c ON c.id = m.chat_id WHERE c.owner_id = ? ORDER BY m.created_at ASC, m.rowid ASC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;

    let mut by_chat: HashMap<String, Vec<ChatMessage>> = HashMap::new();
    for row in &message_rows {
        let message = message_from_row(row)?;
        by_chat
            .entry(message.chat_id.clone())
            .or_default()
            .push(message);
    }

    chat_rows
        .iter()
        .map(|row| {
            let mut chat = chat_from_row(row)?;
            chat.messages = by_chat.remove(&chat.id).unwrap_or_default();
            Ok(chat)
        })
        .collect()
}

pub async fn get_chat(pool: &DbPool, owner: &str, chat_id: &str) -> Result<Chat> {
    let row = sqlx::query("SELECT * FROM chats WHERE id = ? AND owner_id = ?")
        .bind(chat_id)
        .bind(owner)
        .fetch_optional(pool)
        .await?;

    let mut chat = match row {
        Some(r) => chat_from_row(&r)?,
        None => return Err(RelayError::NotFound(format!("chat {}", chat_id)).into()),
    };

    let rows = sqlx::query(
        "SELECT * FROM chat_messages WHERE chat_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    chat.messages = rows.iter().map(message_from_row).collect::<Result<_>>()?;
    Ok(chat)
}

/// Appends a message and bumps the chat's `updated_at`. The first user
/// message of an empty chat also becomes its title.
pub async fn add_message(
    pool: &DbPool,
    owner: &str,
    chat_id: &str,
    role: Role,
    content: &str,
) -> Result<ChatMessage> {
    let mut tx = pool.begin().await?;

    let count: Option<(i64,)> = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM chat_messages WHERE chat_id = c.id) FROM chats c WHERE c.id = ? AND c.owner_id = ?",
    )
    .bind(chat_id)
    .bind(owner)
    .fetch_optional(&mut *tx)
    .await?;

    let existing = match count {
        Some((n,)) => n,
        None => return Err(RelayError::NotFound(format!("chat {}", chat_id)).into()),
    };

    let now = Utc::now();
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        role,
        content: content.to_string(),
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO chat_messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(chat_id)
    .bind(role.as_str())
    .bind(content)
    .bind(timestamp(now))
    .execute(&mut *tx)
    .await?;

    if existing == 0 && role == Role::User {
        sqlx::query("UPDATE chats SET title = ?, updated_at = ? WHERE id = ?")
            .bind(generate_title(content))
            .bind(timestamp(now))
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(timestamp(now))
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(message)
}

pub async fn update_chat_title(pool: &DbPool, owner: &str, chat_id: &str, title: &str) -> Result<()> {
    let result = sqlx::query("UPDATE chats SET title = ?, updated_at = ? WHERE id = ? AND owner_id = ?")
        .bind(title)
        .bind(timestamp(Utc::now()))
        .bind(chat_id)
        .bind(owner)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RelayError::NotFound(format!("chat {}", chat_id)).into());
    }
    Ok(())
}

pub async fn delete_chat(pool: &DbPool, owner: &str, chat_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM chat_messages WHERE chat_id IN (SELECT id FROM chats WHERE id = ? AND owner_id = ?)",
    )
    .bind(chat_id)
    .bind(owner)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM chats WHERE id = ? AND owner_id = ?")
        .bind(chat_id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RelayError::NotFound(format!("chat {}", chat_id)).into());
    }
    tx.commit().await?;
    Ok(())
}

/// Removes all of the owner's chats; returns how many were deleted.
pub async fn clear_chats(pool: &DbPool, owner: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM chat_messages WHERE chat_id IN (SELECT id FROM chats WHERE owner_id = ?)",
    )
    .bind(owner)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM chats WHERE owner_id = ?")
        .bind(owner)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

fn personality_from_row(row: &SqliteRow) -> Result<Personality> {
    Ok(Personality {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        system_prompt: row.try_get("system_prompt")?,
        avatar: row.try_get("avatar")?,
        custom: true,
    })
}

pub async fn create_custom_personality(
    pool: &DbPool,
    owner: &str,
    new: &NewPersonality,
) -> Result<Personality> {
    if new.name.trim().is_empty() || new.system_prompt.trim().is_empty() {
        return Err(RelayError::InvalidRequest(
            "name and systemPrompt are required".to_string(),
        )
        .into());
    }

    let personality = Personality {
        id: format!("custom-{}", Uuid::new_v4().simple()),
        name: new.name.clone(),
        description: new.description.clone(),
        system_prompt: new.system_prompt.clone(),
        avatar: new.avatar.clone().unwrap_or_else(|| "🤖".to_string()),
        custom: true,
    };

    sqlx::query(
        "INSERT INTO custom_personalities (id, owner_id, name, description, system_prompt, avatar, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&personality.id)
    .bind(owner)
    .bind(&personality.name)
    .bind(&personality.description)
    .bind(&personality.system_prompt)
    .bind(&personality.avatar)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(personality)
}

pub async fn list_custom_personalities(pool: &DbPool, owner: &str) -> Result<Vec<Personality>> {
    let rows = sqlx::query(
        "SELECT * FROM custom_personalities WHERE owner_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;
    rows.iter().map(personality_from_row).collect()
}

pub async fn get_custom_personality(
    pool: &DbPool,
    owner: &str,
    id: &str,
) -> Result<Option<Personality>> {
    let row = sqlx::query("SELECT * FROM custom_personalities WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(personality_from_row).transpose()
}

pub async fn delete_custom_personality(pool: &DbPool, owner: &str, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM custom_personalities WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RelayError::NotFound(format!("personality {}", id)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    #[test]
    fn test_generate_title() {
        assert_eq!(generate_title("short"), "short");
        let long = "a".repeat(31);
        assert_eq!(generate_title(&long), format!("{}...", "a".repeat(30)));
        assert_eq!(generate_title(&"é".repeat(30)), "é".repeat(30));
    }

    #[tokio::test]
    async fn test_create_chat_with_first_message() {
        let (_dir, pool) = test_pool().await;
        let chat = create_chat(&pool, "u1", "helpful", Some("How do lifetimes work in Rust?"))
            .await
            .unwrap();
        assert_eq!(chat.title, "How do lifetimes work in Rust?");
        assert_eq!(chat.messages.len(), 1);

        let loaded = get_chat(&pool, "u1", &chat.id).await.unwrap();
        assert_eq!(loaded.messages[0].role, Role::User);
        assert_eq!(loaded.messages[0].content, "How do lifetimes work in Rust?");
    }

    #[tokio::test]
    async fn test_first_user_message_titles_empty_chat() {
        let (_dir, pool) = test_pool().await;
        let chat = create_chat(&pool, "u1", "coder", None).await.unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);

        add_message(&pool, "u1", &chat.id, Role::User, "Explain the borrow checker in detail please")
            .await
            .unwrap();
        add_message(&pool, "u1", &chat.id, Role::Assistant, "Sure.")
            .await
            .unwrap();
        add_message(&pool, "u1", &chat.id, Role::User, "Another question")
            .await
            .unwrap();

        let loaded = get_chat(&pool, "u1", &chat.id).await.unwrap();
        assert_eq!(loaded.title, "Explain the borrow checker in ...");
        let contents: Vec<&str> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Explain the borrow checker in detail please", "Sure.", "Another question"]
        );
        assert!(loaded.updated_at >= chat.updated_at);
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let (_dir, pool) = test_pool().await;
        let chat = create_chat(&pool, "u1", "helpful", None).await.unwrap();

        assert!(get_chat(&pool, "u2", &chat.id).await.is_err());
        assert!(add_message(&pool, "u2", &chat.id, Role::User, "hi").await.is_err());
        assert!(delete_chat(&pool, "u2", &chat.id).await.is_err());
        assert!(list_chats(&pool, "u2").await.unwrap().is_empty());
        assert_eq!(list_chats(&pool, "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_recent_activity() {
        let (_dir, pool) = test_pool().await;
        let older = create_chat(&pool, "u1", "helpful", Some("first")).await.unwrap();
        let newer = create_chat(&pool, "u1", "helpful", Some("second")).await.unwrap();

        let ids: Vec<String> = list_chats(&pool, "u1").await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);

        add_message(&pool, "u1", &older.id, Role::Assistant, "reply").await.unwrap();
        let chats = list_chats(&pool, "u1").await.unwrap();
        assert_eq!(chats[0].id, older.id);
        assert_eq!(chats[0].messages.len(), 2);
        assert_eq!(chats[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (_dir, pool) = test_pool().await;
        let a = create_chat(&pool, "u1", "helpful", Some("a")).await.unwrap();
        create_chat(&pool, "u1", "helpful", Some("b")).await.unwrap();
        create_chat(&pool, "u2", "helpful", Some("c")).await.unwrap();

        delete_chat(&pool, "u1", &a.id).await.unwrap();
        let err = delete_chat(&pool, "u1", &a.id).await.unwrap_err();
        assert!(matches!(err.inner, RelayError::NotFound(_)));

        assert_eq!(clear_chats(&pool, "u1").await.unwrap(), 1);
        assert!(list_chats(&pool, "u1").await.unwrap().is_empty());
        assert_eq!(list_chats(&pool, "u2").await.unwrap().len(), 1);

        let orphans: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_messages WHERE chat_id NOT IN (SELECT id FROM chats)",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(orphans.0, 0);
    }

    #[tokio::test]
    async fn test_custom_personalities() {
        let (_dir, pool) = test_pool().await;
        let created = create_custom_personality(
            &pool,
            "u1",
            &NewPersonality {
                name: "Pirate".into(),
                description: "Talks like a pirate".into(),
                system_prompt: "Answer like a pirate.".into(),
                avatar: None,
            },
        )
        .await
        .unwrap();
        assert!(created.custom);

        let found = get_custom_personality(&pool, "u1", &created.id).await.unwrap();
        assert_eq!(found, Some(created.clone()));
        assert!(get_custom_personality(&pool, "u2", &created.id).await.unwrap().is_none());

        delete_custom_personality(&pool, "u1", &created.id).await.unwrap();
        assert!(list_custom_personalities(&pool, "u1").await.unwrap().is_empty());
    }
}
