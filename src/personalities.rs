use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::types::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub avatar: String,
    #[serde(default)]
    pub custom: bool,
}

/// Body of `POST /api/personalities`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPersonality {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

fn preset(id: &str, name: &str, description: &str, avatar: &str, system_prompt: &str) -> Personality {
    Personality {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: system_prompt.to_string(),
        avatar: avatar.to_string(),
        custom: false,
    }
}

lazy_static! {
    static ref BUILTIN: Vec<Personality> = vec![
        preset(
            "helpful",
            "Helpful Assistant",
            "A friendly and helpful AI assistant",
            "🧠",
            "You are a helpful AI assistant. Give accurate, useful and concise answers. Format your answers with Markdown when appropriate.",
        ),
        preset(
            "creative",
            "Creative Writer",
            "An imaginative storyteller",
            "✍️",
            "You are a creative writer with a vivid imagination. Write engaging, descriptive and imaginative answers using rich language and narrative technique. Format your answers with Markdown when appropriate.",
        ),
        preset(
            "coder",
            "Code Expert",
            "An expert in programming and technology",
            "👨‍💻",
            "You are a programming expert. Give detailed technical explanations and code examples with proper syntax highlighting. Favour good practice, efficiency and readability. Format your answers with Markdown code blocks.",
        ),
        preset(
            "philosopher",
            "Philosopher",
            "A deep thinker exploring existence and knowledge",
            "🧐",
            "You are a philosopher exploring deep questions about existence, knowledge, values, reason, mind and language. Offer thoughtful, nuanced perspectives and consider several points of view. Format your answers with Markdown when appropriate.",
        ),
        preset(
            "teacher",
            "Educator",
            "A patient teacher who explains concepts clearly",
            "👩‍🏫",
            "You are an educator who excels at explaining complex concepts in simple terms. Break information into digestible parts, use analogies where helpful and structure explanations logically. Format your answers with Markdown when appropriate.",
        ),
    ];
}

pub fn builtin() -> &'static [Personality] {
    &BUILTIN
}

pub fn find_builtin(id: &str) -> Option<&'static Personality> {
    BUILTIN.iter().find(|p| p.id == id)
}

/// Built-ins first, then the owner's custom presets.
pub async fn resolve(pool: &DbPool, owner: &str, id: &str) -> Result<Option<Personality>> {
    if let Some(p) = find_builtin(id) {
        return Ok(Some(p.clone()));
    }
    crate::db::get_custom_personality(pool, owner, id).await
}

pub async fn list_for_owner(pool: &DbPool, owner: &str) -> Result<Vec<Personality>> {
    let mut all = builtin().to_vec();
    all.extend(crate::db::list_custom_personalities(pool, owner).await?);
    Ok(all)
}
