/// Gemini endpoint defaults
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

/// Fixed generation parameters, not configurable per call.
pub const GENERATION_TEMPERATURE: f32 = 0.7;
pub const GENERATION_TOP_K: u32 = 40;
pub const GENERATION_TOP_P: f32 = 0.95;
pub const GENERATION_MAX_OUTPUT_TOKENS: u32 = 2048;

pub const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";
pub const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Provider event-stream framing
pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const MAX_PENDING_LINE_BYTES: usize = 1024 * 1024;

/// Relay wire
pub const RELAY_CHANNEL_CAPACITY: usize = 64;
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process your request";
pub const EXCHANGE_ID_HEADER: &str = "x-exchange-id";
pub const OWNER_HEADER: &str = "x-user-id";
pub const DEFAULT_OWNER: &str = "local";

/// Client side
pub const FALLBACK_REPLY: &str = "Sorry, I ran into an error. Please try again.";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const MAX_RECORD_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Transcript store
pub const DEFAULT_CHAT_TITLE: &str = "New conversation";
pub const TITLE_MAX_CHARS: usize = 30;
