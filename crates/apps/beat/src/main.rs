//! Beat - Terminal client for White Beat conversations
//!
//! This is the main entry point for the beat application.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chat::{ActionHandler, ChatBackend, ChatConfig, ChatState, HttpBackend};
use clap::Parser;
use log::{error, info};

mod demo;
mod input;
mod render;
mod runtime;

use runtime::Runtime;

/// White Beat terminal client
#[derive(Parser, Debug)]
#[command(name = "beat")]
#[command(about = "Terminal client for White Beat conversations")]
#[command(version)]
struct Args {
    /// Username to sign in as
    #[arg(short, long, env = "BEAT_USER")]
    user: String,

    #[arg(short, long, env = "BEAT_PASSWORD", hide_env_values = true)]
    password: String,

    /// REST API base URL (overrides config)
    #[arg(long)]
    api_url: Option<String>,

    /// Seconds between polls of the open conversation (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Run against an in-process server with sample users instead of the API
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let args = Args::parse();
    let mut chat_config = ChatConfig::load().context("Failed to load configuration")?;
    if let Some(api_url) = args.api_url {
        chat_config.api_url = api_url;
    }
    if let Some(secs) = args.poll_interval {
        chat_config.poll_interval_secs = secs;
    }
    chat_config.validate()?;

    let backend: Arc<dyn ChatBackend> = if args.demo {
        info!("Running against the in-process demo server");
        Arc::new(demo::backend())
    } else {
        info!("Using API at {}", chat_config.api_url);
        Arc::new(HttpBackend::from_config(&chat_config)?)
    };

    let state = Arc::new(Mutex::new(ChatState::from_config(&chat_config)));
    let handler = ActionHandler::new(backend, state);

    Runtime::new(handler, chat_config)
        .run(args.user, args.password)
        .await
}
