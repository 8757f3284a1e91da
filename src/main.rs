use clap::Parser;
use lm_gateway::config::config_search_paths;
use lm_gateway::logging::LogLevel;
use lm_gateway::provider::{ChatProvider, ScriptedProvider, UpstreamProvider};
use lm_gateway::{build_router, AppState, GatewayConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "lm-gateway",
    about = "Serve one chat-completion provider through OpenAI, Anthropic and Gemini wire protocols",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Request log file path
    #[arg(long, default_value = "lm-gateway.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

fn build_provider(config: &GatewayConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    if config.is_scripted() {
        return Ok(Arc::new(ScriptedProvider::with_text(&[
            "Hello from the scripted provider.",
        ])));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let upstream = UpstreamProvider::new(
        config.provider.name.clone(),
        client,
        config.effective_base_url()?,
        config.api_key(),
    )
    .with_aliases(config.models.clone())
    .with_drop_params(config.params.drop.clone());

    Ok(Arc::new(upstream))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(ref provider) = cli.provider {
        config.set_provider(provider);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.tracing_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let min_level = config.log_level.parse().unwrap_or(LogLevel::Info);
    let logger = SharedLogger::new(&cli.log_file, min_level)?;
    logger.compact()?;

    let provider = build_provider(&config)?;

    info!("lm-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:  {}", provider.name());
    if !config.is_scripted() {
        info!("  Base URL:  {}", config.effective_base_url()?);
        if config.missing_api_key() {
            warn!("  API key:   ${} not set, sending no credentials", config.provider.api_key_env);
        }
    }
    info!(
        "  Defaults:  openai={} anthropic={} gemini={}",
        config.defaults.openai, config.defaults.anthropic, config.defaults.gemini
    );
    info!("  Models:    {} mapped", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting lm-gateway provider={} host={} port={}",
            provider.name(),
            config.host,
            config.port
        ),
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        provider,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI:    http://{}/openai/v1", bind_addr);
    info!("  Anthropic: http://{}/anthropic", bind_addr);
    info!("  Gemini:    http://{}/gemini", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
