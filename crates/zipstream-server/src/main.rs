use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use zipstream::BundleStreamer;
use zipstream_server::config::{Overrides, load_config};
use zipstream_server::logging::init_logging;
use zipstream_server::state::{build_registry, open_store, spawn_purger};
use zipstream_server::{AppState, Environment, serve};

#[derive(Parser)]
#[command(name = "zipstream")]
#[command(about = "Bundle remote files and stream them as ZIP archives")]
struct Cli {
    /// Config file (defaults to ~/.config/zipstream/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Deployment environment
    #[arg(long = "env", env = "ZIPSTREAM_ENV", value_enum)]
    environment: Option<Environment>,
    /// SQLite database file, or `:memory:`
    #[arg(long, env = "ZIPSTREAM_DATABASE", value_name = "PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    config.apply(Overrides {
        port: cli.port,
        environment: cli.environment,
        database: cli.database,
    });
    init_logging(config.environment);

    let registry = build_registry(&config.fetchers).context("failed to set up fetchers")?;
    info!(schemes = ?registry.schemes(), "fetchers registered");
    let streamer = BundleStreamer::with_options(registry, config.stream_options());

    let store = Arc::new(open_store(&config).context("failed to open bundle store")?);
    let state = AppState::new(store.clone(), streamer, config.environment);

    let cancel = CancellationToken::new();
    let purger = spawn_purger(store, config.purge_interval(), cancel.clone());

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(
        addr = %listener.local_addr()?,
        environment = ?config.environment,
        "zipstream listening"
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let serving = cancel.clone();
    serve(listener, state, async move { serving.cancelled().await }).await?;

    cancel.cancel();
    let _ = purger.await;
    Ok(())
}
