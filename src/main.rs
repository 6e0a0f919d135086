//! Telegram AI Bridge - Entry Point

use std::sync::Arc;
use telegram_ai_bridge::health::{self, AppState};
use telegram_ai_bridge::{Bridge, BotTransport, Config, OpenAiBackend};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Telegram AI Bridge v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: telegram-ai-bridge");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN        Telegram bot token (required)");
        println!("  LLM_BASE_URL              Chat completions base URL (default: https://api.llm7.io/v1)");
        println!("  LLM_API_KEY               API key for the model backend");
        println!("  LLM_MODEL                 Model name (default: gpt-4o-mini)");
        println!("  MODEL_TIMEOUT_SECS        Model call timeout (default: 60)");
        println!("  CONTEXT_MAX_HISTORY       Turns kept per user (default: 10)");
        println!("  CONTEXT_TIMEOUT_SECS      Idle time before history is dropped (default: 1800)");
        println!("  CONTEXT_SWEEP_SECS        Background purge interval, 0 = off (default: 0)");
        println!("  PEER_CACHE_TTL_SECS       Peer cache TTL, 0 = off (default: 0)");
        println!("  MAX_CONCURRENT_DISPATCH   Round-trips in flight (default: 64)");
        println!("  RECORD_FALLBACK_REPLIES   Keep fallback replies in history (default: true)");
        println!("  HEALTH_PORT               Serve /health on this port (default: off)");
        println!("  LOG_FORMAT                'json' for JSON logs");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Telegram AI Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let transport = Arc::new(BotTransport::new(&config.telegram_token));
    let model = Arc::new(OpenAiBackend::from_config(&config)?);
    let bridge = Arc::new(Bridge::from_config(&config, transport, model));

    if let Some(port) = config.health_port {
        let state = Arc::new(AppState::new(Arc::clone(&bridge)));
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, state).await {
                error!("Health server failed: {}", e);
            }
        });
    }

    if let Err(e) = bridge.connect().await {
        error!("Failed to start the application: {:#}", e);
        return Err(e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    bridge.run(shutdown_rx).await
}
