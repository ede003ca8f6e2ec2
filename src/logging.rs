use crate::constants::EXCHANGE_ID_HEADER;
use crate::redaction_layer::RedactingMakeWriter;
use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::panic;
use std::path::Path;
use tracing::{error, info};
use tracing::{info_span, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

/// Installs the global subscriber: stderr, a daily file under `log_dir`
/// with secrets masked, and span traces for `ObservedError`.
///
/// The returned guard must live as long as the process or buffered file
/// output is lost.
pub fn init_tracing(log_dir: &Path) -> WorkerGuard {
    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "persona_relay=debug,panic=error,tower_http=info".into(),
    };

    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "persona-relay.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(RedactingMakeWriter::new(non_blocking))
                .with_ansi(false),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_error::ErrorLayer::default())
        .init();

    guard
}

/// Stderr-only subscriber for the `ask` client, quiet unless `RUST_LOG` says
/// otherwise so it does not interleave with the streamed reply.
pub fn init_client_tracing() {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "persona_relay=warn".into(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Tags every request with an exchange id, both as a header on the request
/// and response and as a field on the request span.
pub async fn exchange_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let exchange_id = Uuid::new_v4().to_string();
    if let Ok(val) = exchange_id.parse() {
        req.headers_mut().insert(EXCHANGE_ID_HEADER, val);
    }

    let span = info_span!(
        "request",
        exchange_id = %exchange_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Ok(val) = exchange_id.parse() {
        response.headers_mut().insert(EXCHANGE_ID_HEADER, val);
    }
    response
}

/// Per-exchange counters of the reframer, logged once the stream ends.
#[derive(Debug, Default, Clone)]
pub struct StreamMetric {
    pub reads: usize,
    pub bytes: usize,
    pub chunks: usize,
    pub text_chars: usize,
    pub ignored_lines: usize,
    pub malformed_lines: usize,
    pub sentinels: usize,
    pub last_finish_reason: Option<String>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&mut self, len: usize) {
        self.reads += 1;
        self.bytes += len;
    }

    pub fn record_delta(&mut self, delta: &str) {
        self.chunks += 1;
        self.text_chars += delta.chars().count();
    }

    pub fn log_summary(&self) {
        info!(
            "[STREAM END] Reads: {} ({} bytes) | Chunks: {} | Text: {} chars | Skipped: {} malformed, {} ignored, {} [DONE] | Finish: {}",
            self.reads,
            self.bytes,
            self.chunks,
            self.text_chars,
            self.malformed_lines,
            self.ignored_lines,
            self.sentinels,
            self.last_finish_reason.as_deref().unwrap_or("NONE")
        );
    }
}
