//! Main application entry point for the warden control plane.
//!
//! Provides CLI interface, configuration loading, and startup wiring for the
//! supervisor, status broadcaster, and HTTP control endpoint.

mod cli;
mod config;
mod signals;

use anyhow::{anyhow, Context, Result};
use cli::CliArgs;
use config::AppConfig;
use control_plane::backups::BackupManager;
use control_plane::broadcaster::spawn_broadcaster;
use control_plane::http::session::SessionStore;
use control_plane::http::{router, AppState};
use control_plane::supervisor::Supervisor;
use control_plane::update::UpdateOrchestrator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Secrets read from the environment once at startup. The process
/// environment is the only place credentials live; they never appear in the
/// config file.
struct Secrets {
    admin_hash: String,
    session_secret: String,
    git_token: Option<String>,
}

impl Secrets {
    fn from_env() -> Result<Self> {
        let admin_hash = std::env::var("WARDEN_ADMIN_HASH").context(
            "WARDEN_ADMIN_HASH must be set (hex SHA-256 of the operator password)",
        )?;
        let session_secret = match std::env::var("WARDEN_SESSION_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                warn!("WARDEN_SESSION_SECRET not set; using a random per-boot secret");
                uuid::Uuid::new_v4().to_string()
            }
        };
        let git_token = std::env::var("WARDEN_GIT_TOKEN").ok();
        Ok(Self {
            admin_hash,
            session_secret,
            git_token,
        })
    }
}

/// Initialize logging system
fn setup_logging(config: &config::LoggingSettings, json_format: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_file(false).with_line_number(false))
            .init();
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .map_err(|e| anyhow!("failed to load configuration: {e}"))?;

    // Apply CLI overrides
    if let Some(bind_address) = args.bind_address {
        config.control.bind_address = bind_address;
    }
    if let Some(log_dir) = args.log_dir {
        config.control.log_dir = log_dir;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }
    // WARDEN_PORT overrides the configured port, keeping the host
    if let Ok(port) = std::env::var("WARDEN_PORT") {
        let port: u16 = port.parse().context("WARDEN_PORT must be a port number")?;
        let host = config
            .control
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        config.control.bind_address = format!("{host}:{port}");
    }

    config.validate().map_err(|e| anyhow!("configuration invalid: {e}"))?;
    setup_logging(&config.logging, args.json_logs)?;
    let secrets = Secrets::from_env()?;

    info!("🛡️ Warden Control Plane v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "📂 Config: {} | Servers: {} | Logs: {}",
        args.config_path.display(),
        config.servers.len(),
        config.control.log_dir.display()
    );

    tokio::fs::create_dir_all(&config.control.log_dir)
        .await
        .context("failed to create log directory")?;

    let supervisor = Supervisor::new(config.servers.clone(), &config.control.log_dir);
    supervisor
        .load_logs()
        .await
        .context("failed to load persisted logs")?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let broadcaster = spawn_broadcaster(supervisor.clone(), shutdown_tx.subscribe());

    let updater = Arc::new(UpdateOrchestrator::new(
        config.update.clone(),
        secrets.git_token,
        supervisor.clone(),
    ));
    let sessions = Arc::new(SessionStore::new(secrets.session_secret, secrets.admin_hash));
    let backups = Arc::new(BackupManager::new(config.backups.directory.clone()));

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        updater,
        backups,
        sessions,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.control.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.control.bind_address))?;
    info!("✅ Control endpoint listening on {}", config.control.bind_address);
    info!("🛑 Press Ctrl+C to gracefully shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signals::wait_for_shutdown().await {
                error!("signal listener failed: {e}");
            }
        })
        .await
        .context("control endpoint failed")?;

    info!("🛑 Shutdown signal received, stopping supervised servers...");
    let _ = shutdown_tx.send(());
    for id in supervisor.running_ids().await {
        if let Err(e) = supervisor.stop(&id).await {
            error!("failed to stop '{id}' during shutdown: {e}");
        }
    }
    // Give graceful IPC shutdowns and the kill watchdogs time to finish
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    broadcaster.abort();

    info!("✅ Warden shutdown complete");
    Ok(())
}
