//! Mindwell session engine (mwl-session) - Main entry point
//!
//! Loads configuration and scripts, opens the history store, starts the
//! session runner and serves the HTTP/SSE control API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mwl_common::config::{resolve_root_folder, TomlConfig};
use mwl_common::events::EventBus;
use mwl_history::{HistoryStore, IdentityHandle, IdentityProvider, User, DEFAULT_SYNC_CHUNK_SIZE};
use mwl_session::api::{self, AppContext};
use mwl_session::audio::{AudioEngine, AudioOutput, HttpTrackLoader, NullOutput};
use mwl_session::catalog::{InMemoryCatalog, ScriptCatalog};
use mwl_session::clock::default_time_source;
use mwl_session::session::{SessionController, SessionRunner};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for mwl-session
#[derive(Parser, Debug)]
#[command(name = "mwl-session")]
#[command(about = "Guided meditation session engine")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "MWL_PORT")]
    port: u16,

    /// Root folder for history and cloud databases
    #[arg(short, long, env = "MWL_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Signed-in account; anonymous local history when absent
    #[arg(short, long, env = "MWL_USER_ID")]
    user_id: Option<String>,

    /// Config file (default: platform config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of *.toml scripts (default: <root>/scripts)
    #[arg(long)]
    scripts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mwl_session=info,mwl_history=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TomlConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::load_or_default(),
    };
    let root = resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;
    info!("Starting Mindwell session engine on port {}", args.port);
    info!("Root folder: {}", root.display());

    let events = Arc::new(EventBus::default());

    // Identity
    let user = match &args.user_id {
        Some(id) => User::authenticated(id.clone()),
        None => User::anonymous("local"),
    };
    let identity = Arc::new(IdentityHandle::new(Some(user)));

    // History
    let local_path = config
        .history
        .local_path
        .clone()
        .unwrap_or_else(|| root.join("history.json"));
    let cloud_path = config
        .history
        .cloud_database
        .clone()
        .unwrap_or_else(|| root.join("cloud.db"));
    let identity_provider: Arc<dyn IdentityProvider> = identity.clone();
    let history = Arc::new(
        HistoryStore::open(&local_path, &cloud_path, identity_provider)
            .await
            .context("Failed to open history store")?
            .with_events(events.clone())
            .with_chunk_size(
                config
                    .history
                    .sync_chunk_size
                    .unwrap_or(DEFAULT_SYNC_CHUNK_SIZE),
            ),
    );
    let watcher = history.clone().spawn_identity_watcher();

    // Scripts
    let scripts_dir = args
        .scripts_dir
        .clone()
        .or_else(|| config.scripts_dir.clone())
        .unwrap_or_else(|| root.join("scripts"));
    let mut catalog = InMemoryCatalog::with_builtins();
    if let Err(e) = catalog.load_dir(&scripts_dir) {
        warn!("Failed to read scripts from {}: {}", scripts_dir.display(), e);
    }
    let catalog: Arc<dyn ScriptCatalog> = Arc::new(catalog);

    // Session engine
    let settings = config.engine.clone();
    let output = open_output(settings.audio_enabled);
    let audio = AudioEngine::new(output, Arc::new(HttpTrackLoader::new()), settings.volume);
    let controller =
        SessionController::new(settings, audio, default_time_source(), events.clone());
    let (session, runner) =
        SessionRunner::spawn(controller, catalog.clone(), Some(history.clone()), events.clone());

    let ctx = AppContext {
        session: session.clone(),
        history,
        identity,
        catalog,
        events,
    };
    api::run(args.port, ctx, shutdown_signal()).await?;

    session.shutdown().await.context("Session runner already stopped")?;
    let _ = runner.await;
    watcher.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Sound device output, or visual-only when there is none
fn open_output(audio_enabled: bool) -> Arc<dyn AudioOutput> {
    if !audio_enabled {
        info!("Audio disabled in config; running visual-only");
        return Arc::new(NullOutput);
    }
    device_output().unwrap_or_else(|| Arc::new(NullOutput))
}

#[cfg(feature = "device-audio")]
fn device_output() -> Option<Arc<dyn AudioOutput>> {
    match mwl_session::audio::CpalOutput::open() {
        Ok(output) => Some(Arc::new(output)),
        Err(e) => {
            warn!("No usable audio device, running visual-only: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn device_output() -> Option<Arc<dyn AudioOutput>> {
    info!("Built without device audio; running visual-only");
    None
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
