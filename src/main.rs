use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use deploy_relay::{serve, AppState, Config, PipelineContext};

/// Resolve Composer manifests and upload the result over FTP
#[derive(Parser, Debug)]
#[command(name = "deploy-relay", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Scratch root, overrides `temp_root`
    #[arg(long)]
    temp_root: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(temp_root) = cli.temp_root {
        config.temp_root = temp_root;
    }
    config.validate().context("Invalid configuration")?;

    if cli.check_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    match which::which(&config.resolver.executable) {
        Ok(path) => info!("Resolution tool: {}", path.display()),
        Err(e) => warn!(
            "Resolution tool {:?} not found ({}), sessions will fail at the resolving stage",
            config.resolver.executable, e
        ),
    }

    std::fs::create_dir_all(&config.temp_root)
        .with_context(|| format!("Failed to create temp root: {}", config.temp_root.display()))?;
    config.temp_root = std::fs::canonicalize(&config.temp_root)
        .with_context(|| format!("Failed to canonicalize temp root: {}", config.temp_root.display()))?;

    info!("Starting deploy-relay {}", env!("CARGO_PKG_VERSION"));
    info!("  Bind: {}", config.bind);
    info!("  Temp root: {}", config.temp_root.display());
    info!(
        "  Rate limit: {}",
        if config.rate_limit.enabled {
            format!("{}s window", config.rate_limit.window_secs)
        } else {
            "disabled".to_string()
        }
    );
    if config.queue.queue_when_resources {
        info!("  Queue: {} concurrent sessions", config.queue.max_concurrent);
    }

    let state = AppState::new(Arc::new(PipelineContext::new(config)));
    serve(state, shutdown_signal()).await.context("Server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
