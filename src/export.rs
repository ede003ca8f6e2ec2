use crate::db::Chat;
use crate::types::Role;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").expect("Invalid filename regex");
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("Invalid filename regex");
    static ref NON_ASCII_RUN: Regex = Regex::new(r"_{2,}").expect("Invalid filename regex");
}

const FALLBACK_FILE_STEM: &str = "chat";

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Md,
    Txt,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Md => "text/markdown; charset=utf-8",
            ExportFormat::Txt => "text/plain; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Md => "md",
            ExportFormat::Txt => "txt",
        }
    }
}

fn sender<'a>(role: Role, personality_name: Option<&'a str>) -> &'a str {
    match role {
        Role::User => "You",
        _ => personality_name.unwrap_or("AI"),
    }
}

pub fn render(chat: &Chat, format: ExportFormat, personality_name: Option<&str>) -> String {
    let mut out = String::new();
    if format == ExportFormat::Md {
        out.push_str(&format!("# {}\n\n", chat.title));
    }
    for message in &chat.messages {
        let who = sender(message.role, personality_name);
        match format {
            ExportFormat::Md => out.push_str(&format!("## {}\n\n{}\n\n", who, message.content)),
            ExportFormat::Txt => out.push_str(&format!("{}:\n{}\n\n", who, message.content)),
        }
    }
    out
}

/// Title reduced to word characters and single spaces.
pub fn file_name(title: &str, format: ExportFormat) -> String {
    let stripped = NON_WORD.replace_all(title, "");
    let collapsed = WHITESPACE_RUN.replace_all(&stripped, " ");
    let stem = match collapsed.trim() {
        "" => FALLBACK_FILE_STEM,
        s => s,
    };
    format!("{}.{}", stem, format.extension())
}

/// `Content-Disposition` for a download: an ASCII `filename` for old
/// clients and the exact name as RFC 5987 `filename*`.
pub fn content_disposition(title: &str, format: ExportFormat) -> String {
    let name = file_name(title, format);
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let ascii = NON_ASCII_RUN.replace_all(&ascii, "_");

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChatMessage;
    use chrono::Utc;

    fn chat() -> Chat {
        let now = Utc::now();
        let message = |role, content: &str| ChatMessage {
            id: "m".into(),
            chat_id: "c".into(),
            role,
            content: content.into(),
            created_at: now,
        };
        Chat {
            id: "c".into(),
            owner_id: "u".into(),
            title: "Rust? Yes!".into(),
            personality_id: "coder".into(),
            created_at: now,
            updated_at: now,
            messages: vec![message(Role::User, "Why Rust?"), message(Role::Assistant, "Safety.")],
        }
    }

    #[test]
    fn test_markdown_export() {
        let out = render(&chat(), ExportFormat::Md, Some("Code Expert"));
        assert_eq!(
            out,
            "# Rust? Yes!\n\n## You\n\nWhy Rust?\n\n## Code Expert\n\nSafety.\n\n"
        );
    }

    #[test]
    fn test_text_export_unknown_personality() {
        let out = render(&chat(), ExportFormat::Txt, None);
        assert_eq!(out, "You:\nWhy Rust?\n\nAI:\nSafety.\n\n");
    }

    #[test]
    fn test_file_name_strips_punctuation() {
        assert_eq!(file_name("Rust? Yes!", ExportFormat::Md), "Rust Yes.md");
        assert_eq!(file_name("a/b", ExportFormat::Txt), "ab.txt");
    }

    #[test]
    fn test_file_name_is_single_line() {
        assert_eq!(file_name("Hi\nsecond\t\r\n line", ExportFormat::Md), "Hi second line.md");
        assert_eq!(file_name("???", ExportFormat::Txt), "chat.txt");
        assert_eq!(file_name(" \n ", ExportFormat::Md), "chat.md");
    }

    #[test]
    fn test_content_disposition_is_ascii() {
        assert_eq!(
            content_disposition("Hi\nthere", ExportFormat::Md),
            "attachment; filename=\"Hi there.md\"; filename*=UTF-8''Hi%20there.md"
        );

        let value = content_disposition("Grüße wörld", ExportFormat::Txt);
        assert_eq!(
            value,
            "attachment; filename=\"Gr_e w_rld.txt\"; filename*=UTF-8''Gr%C3%BC%C3%9Fe%20w%C3%B6rld.txt"
        );
        assert!(axum::http::HeaderValue::from_str(&value).is_ok());
    }
}
