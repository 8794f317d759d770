use anyhow::Context;
use bookswap::{
    config::{create_default_config_file, AppConfig, LoggingConfig},
    http::{router, AppState},
    Database, HttpSummarizer, TokenVerifier,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bookswap-server")]
#[command(about = "Book-exchange marketplace API server")]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(short, long)]
    database_url: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Write a default configuration file to `--config` and exit.
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(format!("{},tower_http=debug", logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        create_default_config_file(&args.config)?;
        println!("Wrote default configuration to {}", args.config);
        return Ok(());
    }

    let mut config = if Path::new(&args.config).exists() {
        AppConfig::load_with_env_overrides(&args.config)?
    } else {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    };

    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    init_tracing(&config.logging);
    info!("Starting bookswap server");

    let database = Database::connect(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.get_database_url()))?;

    if !config.is_summary_configured() {
        info!("No summary API key configured, using local summaries");
    }
    let summarizer = Arc::new(HttpSummarizer::new(config.summary.clone())?);

    let secret = config.get_jwt_secret().unwrap_or_default();
    let state = AppState::new(database, summarizer, TokenVerifier::new(secret));

    let listener = TcpListener::bind(config.get_server_address()).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
