mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

use stratum_context::{ContextConfig, ContextManager, Summarizer, SummarizerConfig};
use stratum_engine::TurnEngine;
use stratum_llm::{
    ChatGateway, HttpGateway, HttpGatewayConfig, LlmChannels, RetryConfig, RetryingGateway,
};
use stratum_mcp::{McpClient, McpClientConfig, ToolTransport};
use stratum_server::{ChatService, ChatServiceConfig, ServerConfig};
use stratum_store::Database;
use stratum_telemetry::{LogFormat, TelemetryConfig};

use config::{ChannelSettings, Settings};

#[derive(Parser)]
#[command(name = "stratum", about = "Conversational LLM backend with bounded-context compression")]
struct Args {
    /// Path to the JSON settings file.
    #[arg(long, default_value = "stratum.json")]
    config: PathBuf,

    /// Port to listen on (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the SQLite database file (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, pretty).
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut settings = match config::load_settings(&args.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("stratum: failed to load settings: {e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db_path) = &args.db_path {
        settings.database.path = db_path.display().to_string();
    }
    if let Some(level) = &args.log_level {
        settings.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        settings.logging.format = format.clone();
    }

    init_logging(&settings);
    tracing::info!(
        port = settings.server.port,
        db = %settings.database.path,
        "starting stratum"
    );

    let db = match Database::open(std::path::Path::new(&settings.database.path)) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let channels = build_channels(&settings);

    let summarizer = Summarizer::new(
        channels.shrink.clone(),
        SummarizerConfig {
            anchors_count: settings.chat.anchors_count,
            summary_max_length: settings.chat.summary_max_length,
            min_items_for_summary: settings.chat.min_messages_for_summary,
        },
    );

    let context = Arc::new(ContextManager::new(
        db.clone(),
        summarizer,
        ContextConfig {
            window_size: settings.chat.context_window_size,
            message_compression_ratio: settings.chat.message_compression_ratio,
            summary_compression_ratio: settings.chat.summary_compression_ratio,
            min_messages_in_window: settings.chat.min_messages_in_window,
            max_messages_before_compress: settings.chat.max_messages_before_compress,
        },
    ));

    let tools = connect_mcp(&settings).await;
    let engine = match TurnEngine::initialize(
        channels.main.clone(),
        tools,
        settings.mcp.max_iterations,
    )
    .await
    {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize turn engine");
            std::process::exit(1);
        }
    };
    tracing::info!(tools = engine.tool_count(), "turn engine ready");

    let service = Arc::new(ChatService::new(
        db,
        context,
        engine,
        channels,
        ChatServiceConfig {
            system_prompt: load_system_prompt(&settings),
            turn_timeout: Duration::from_secs(settings.chat.turn_timeout_secs),
            max_messages_per_session: settings.chat.max_messages_per_session,
            cost_per_token: settings.chat.cost_per_token,
        },
    ));

    let server_config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let handle = match stratum_server::start(server_config, service).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    tracing::info!(port = handle.port, "stratum ready");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    handle.shutdown();
    if tokio::time::timeout(Duration::from_secs(10), handle.drain())
        .await
        .is_err()
    {
        tracing::warn!("server drain timed out after 10s");
    }
    tracing::info!("shutdown complete");
}

fn init_logging(settings: &Settings) {
    let log_level = settings
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    let format = settings
        .logging
        .format
        .parse()
        .unwrap_or(LogFormat::Json);
    stratum_telemetry::init_telemetry(&TelemetryConfig { log_level, format });
}

fn build_channel(name: &str, channel: &ChannelSettings) -> Arc<dyn ChatGateway> {
    let gateway = HttpGateway::new(HttpGatewayConfig {
        base_url: channel.base_url.clone(),
        api_key: SecretString::from(channel.api_key.clone()),
        model: channel.model.clone(),
        timeout: Duration::from_secs(channel.timeout_secs),
        channel: name.to_owned(),
    });
    Arc::new(RetryingGateway::new(gateway, RetryConfig::default()))
}

fn build_channels(settings: &Settings) -> LlmChannels {
    if settings.llm.main.api_key.is_empty() {
        tracing::warn!("no API key configured for the main channel, completions will fail");
    }
    LlmChannels::new(
        build_channel("main", &settings.llm.main),
        build_channel("shrink", &settings.llm.shrink),
    )
}

async fn connect_mcp(settings: &Settings) -> Option<Arc<dyn ToolTransport>> {
    if !settings.mcp.enabled {
        tracing::info!("MCP disabled, running without tools");
        return None;
    }

    let config = McpClientConfig {
        server_url: settings.mcp.server_url.clone(),
        headers: Vec::new(),
        request_timeout: Duration::from_secs(settings.mcp.request_timeout_secs),
    };
    match McpClient::connect(config).await {
        Ok(client) => Some(Arc::new(client) as Arc<dyn ToolTransport>),
        Err(e) => {
            tracing::warn!(error = %e, server = %settings.mcp.server_url, "MCP server unreachable, running without tools");
            None
        }
    }
}

fn load_system_prompt(settings: &Settings) -> String {
    let path = std::path::Path::new(&settings.chat.system_prompt_path);
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            tracing::info!(path = %path.display(), chars = content.trim().len(), "system prompt loaded");
            content.trim().to_owned()
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "system prompt file is empty, using built-in default");
            ChatServiceConfig::default().system_prompt
        }
        Err(_) => {
            tracing::info!(path = %path.display(), "no system prompt file, using built-in default");
            ChatServiceConfig::default().system_prompt
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    }
}
