//! imagesync - download a server's image manifest once and list the cached
//! images from then on.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync` | Sync if needed, then list the images |
//! | `list` | List images from the store without syncing |
//! | `status` | Show what the store holds and when it last synced |
//! | `keys` | List the keys in the application namespace |
//! | `reset` | Delete everything the application stored |

mod format;
mod screen;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagesync_core::{
    Config, HttpImageServer, ImageRepository, KeyValueStore, SledBackend, SyncManager,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use screen::{Screen, ScreenState};

#[derive(Parser)]
#[command(name = "imagesync", version)]
#[command(about = "Download and cache the images listed by an image server", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir/imagesync/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application id used to namespace store keys
    #[arg(long, global = true)]
    app_id: Option<String>,

    /// Image server host, e.g. images.example.com or http://localhost:8000
    #[arg(long, global = true)]
    server: Option<String>,

    /// Store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Maximum image downloads in flight
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync if needed, then list the images
    Sync {
        /// Automatic retries before asking
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List images from the store without syncing
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what the store holds
    Status,
    /// List keys in the application namespace
    Keys,
    /// Delete everything the application stored
    Reset,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|name| std::env::var(name).ok())?;
            config
        }
        None => Config::load()?,
    };

    if let Some(app_id) = &cli.app_id {
        config.app_id = app_id.clone();
    }
    if let Some(server) = &cli.server {
        config.image_server = server.clone();
    }
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn build_manager(config: &Config) -> Result<SyncManager<HttpImageServer>> {
    let store_path = config.store_path()?;
    let backend = SledBackend::open(&store_path)
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;
    let store = KeyValueStore::new(&config.app_id, Arc::new(backend)).context("Invalid app id")?;
    let server = HttpImageServer::new(&config.image_server)
        .context("Failed to create image server client")?;

    info!(
        app_id = %config.app_id,
        server = %server.base_url(),
        store = %store_path.display(),
        "imagesync starting"
    );

    Ok(SyncManager::new(server, ImageRepository::new(store)).with_concurrency(config.concurrency))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let manager = build_manager(&config).await?;

    match cli.command {
        Command::Sync { retries, json } => {
            let mut screen = Screen::new(json);
            screen.run(&manager, retries).await?;
        }
        Command::List { json } => {
            let mut screen = Screen::new(json);
            screen.state = ScreenState::Ready(manager.load_display_records().await?);
            screen.render()?;
        }
        Command::Status => {
            let status = manager.status().await?;
            let manifest = match status.manifest_entries {
                Some(n) => format!("{} entries", n),
                None => "not stored".to_string(),
            };
            println!("manifest:      {}", manifest);
            println!("stored images: {}", status.stored_assets);
            println!("orphaned:      {}", status.orphaned_assets);
            println!("complete:      {}", status.state.is_complete());
            println!("last sync:     {}", status.state.age_display());
        }
        Command::Keys => {
            for key in manager.repository().store().get_all_keys().await? {
                println!("{}", key);
            }
        }
        Command::Reset => {
            manager.reset().await?;
            println!("Store cleared for {}", config.app_id);
        }
    }

    Ok(())
}
