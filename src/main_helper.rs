use crate::constants::{
    DEFAULT_IDLE_TIMEOUT_SECS, GEMINI_API_KEY_ENV, GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL,
};
use crate::db::DbPool;
use crate::types::*;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server
    Serve(ServeArgs),
    /// Send one message to a running relay and print the reply as it streams
    Ask(AskArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "persona-relay.db")]
    pub database: String,
    #[arg(long, default_value = GEMINI_DEFAULT_MODEL)]
    pub model: String,
    #[arg(long, default_value = GEMINI_BASE_URL)]
    pub upstream_base_url: String,
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    /// Base URL of the relay
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub url: String,
    #[arg(long)]
    pub personality: Option<String>,
    #[arg(long)]
    pub system_prompt: Option<String>,
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,
    pub message: String,
}

/// Upstream settings resolved once at process start.
///
/// `api_key` comes from `GEMINI_API_KEY`; nothing downstream of `main`
/// touches the environment.
#[derive(Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RelayConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_args(args: &ServeArgs, api_key: String) -> Self {
        Self::new(api_key, args.model.clone(), args.upstream_base_url.clone())
    }

    /// Reads the required key from the process environment.
    pub fn api_key_from_env() -> Result<String> {
        match std::env::var(GEMINI_API_KEY_ENV) {
            Ok(k) if !k.trim().is_empty() => Ok(k),
            _ => Err(RelayError::Internal(
                format!("{} environment variable is missing or empty", GEMINI_API_KEY_ENV),
                tracing_error::SpanTrace::capture(),
            )
            .into()),
        }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub config: Arc<RelayConfig>,
    pub db: DbPool,
    pub health: Arc<UpstreamHealth>,
}

impl AppState {
    pub fn new(client: reqwest::Client, config: RelayConfig, db: DbPool) -> Self {
        Self {
            client,
            config: Arc::new(config),
            db,
            health: Arc::new(UpstreamHealth::default()),
        }
    }
}

pub fn build_http_client(args: &ServeArgs) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
        .build()?;
    Ok(client)
}
