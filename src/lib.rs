pub mod api;
pub mod client;
pub mod constants;
pub mod db;
pub mod export;
pub mod framing;
pub mod health;
pub mod logging;
pub mod main_helper;
pub mod personalities;
pub mod projections;
pub mod redaction_layer;
pub mod server;
pub mod specs;
pub mod str_utils;
pub mod streaming;
pub mod types;
pub mod upstream;

pub use types::*;

pub use main_helper::{AppState, Cli, Command, RelayConfig};
