use persona_relay::client::{ChatClient, ChatView, ExchangeEnd, MessageSink};
use persona_relay::main_helper::{build_http_client, AskArgs, ServeArgs};
use persona_relay::*;

use clap::Parser;
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Ask(args) => ask(args).await,
    };
    std::process::exit(code);
}

async fn serve(args: ServeArgs) -> i32 {
    let _guard = persona_relay::logging::init_tracing(&args.log_dir);
    persona_relay::logging::setup_panic_hook();

    let api_key = match RelayConfig::api_key_from_env() {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {}", e.inner);
            eprintln!("Please set it in your .env file or environment.");
            return 1;
        }
    };
    let config = RelayConfig::from_args(&args, api_key);
    tracing::info!("Upstream: {:?}", config);

    let client = match build_http_client(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e.inner);
            return 1;
        }
    };

    let db = match persona_relay::db::init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e.inner);
            return 1;
        }
    };

    let state = Arc::new(AppState::new(client, config, db));
    let app = persona_relay::server::build_router(
        state,
        args.static_dir.as_deref(),
        args.max_body_size,
    );

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return 1;
        }
    };

    tracing::info!("persona-relay listening on {}", addr);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => {
            tracing::info!("Server stopped");
            0
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            1
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining connections");
}

/// Prints only what is new since the last update.
struct TerminalSink {
    printed: usize,
    view: ChatView,
}

impl MessageSink for TerminalSink {
    fn update_content(&mut self, content: &str) {
        if let Some(new) = content.get(self.printed..) {
            print!("{}", new);
            let _ = std::io::stdout().flush();
            self.printed = content.len();
        }
        self.view.update_content(content);
    }

    fn set_streaming(&mut self, streaming: bool) {
        self.view.set_streaming(streaming);
    }
}

async fn ask(args: AskArgs) -> i32 {
    persona_relay::logging::init_client_tracing();

    let http = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            return 1;
        }
    };
    let client = ChatClient::new(http, &args.url, Duration::from_secs(args.idle_timeout_secs));

    let mut sink = TerminalSink {
        printed: 0,
        view: ChatView::new(),
    };
    let request = sink
        .view
        .begin_exchange(&args.message, args.system_prompt, args.personality);

    match client.send(&request, &mut sink).await {
        Ok(ExchangeEnd::Completed(_)) => {
            sink.view.end_exchange();
            println!();
            0
        }
        Ok(ExchangeEnd::Dropped(_)) => {
            sink.view.end_exchange();
            println!();
            eprintln!("{}", "[connection closed before the reply finished]".yellow());
            0
        }
        Err(e) => {
            sink.view.fail_exchange();
            if sink.printed > 0 {
                println!();
            } else if let Some(reply) = sink.view.last_reply() {
                println!("{}", reply.red());
            }
            eprintln!("{}", format!("Error: {}", e).red());
            1
        }
    }
}
