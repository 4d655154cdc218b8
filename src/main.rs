use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fermata_server::audit::{AuditLogger, SqliteAuditStore};
use fermata_server::config::FileConfig;
use fermata_server::pdf::LopdfTextEngine;
use fermata_server::providers::HttpVisionDispatcher;
use fermata_server::queue::{JobQueue, SqliteJobStore};
use fermata_server::server::{run_server, Permission, ServerState, StaticTokenAuthenticator};
use fermata_server::smart_upload::{
    LoggingCommitter, ProgressBus, SmartUploadProcessor, SqliteSessionStore,
};
use fermata_server::storage::FsObjectStore;
use fermata_server::SqliteSettingsStore;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on (overrides the config file).
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Directory containing database files (overrides the config file).
    #[clap(long)]
    pub db_dir: Option<PathBuf>,

    /// Root directory of the object store (overrides the config file).
    #[clap(long)]
    pub storage_dir: Option<PathBuf>,
}

fn permission_from_name(name: &str) -> Option<Permission> {
    match name {
        "manage_system_config" => Some(Permission::ManageSystemConfig),
        "manage_uploads" => Some(Permission::ManageUploads),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let mut config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_dir) = args.db_dir {
        config.db_dir = db_dir;
    }
    if let Some(storage_dir) = args.storage_dir {
        config.storage_dir = storage_dir;
    }

    std::fs::create_dir_all(&config.db_dir)?;

    // Stores, one database file per concern.
    let settings_store = Arc::new(SqliteSettingsStore::new(config.db_dir.join("settings.db"))?);
    let session_store = Arc::new(SqliteSessionStore::new(config.db_dir.join("sessions.db"))?);
    let job_store = Arc::new(SqliteJobStore::new(config.db_dir.join("jobs.db"))?);
    let audit_store = Arc::new(SqliteAuditStore::new(config.db_dir.join("audit.db"))?);
    let audit = Arc::new(AuditLogger::new(audit_store));

    let object_store = Arc::new(FsObjectStore::new(&config.storage_dir));
    object_store.init().await?;

    let vision = Arc::new(HttpVisionDispatcher::new());
    let job_queue = Arc::new(
        JobQueue::new(job_store, Some(audit.clone()))
            .with_concurrency(config.worker_concurrency),
    );
    let progress = ProgressBus::new();

    let processor = Arc::new(SmartUploadProcessor::new(
        session_store.clone(),
        settings_store.clone(),
        object_store.clone(),
        Arc::new(LopdfTextEngine::new()),
        vision.clone(),
        job_queue.clone(),
        progress.clone(),
        audit.clone(),
        Arc::new(LoggingCommitter),
    ));

    let mut authenticator = StaticTokenAuthenticator::new();
    for entry in &config.auth_tokens {
        let permissions: Vec<Permission> = entry
            .permissions
            .iter()
            .filter_map(|name| permission_from_name(name))
            .collect();
        authenticator = authenticator.with_user(
            entry.token.clone(),
            entry.user_id.clone(),
            permissions,
            entry.csrf_token.clone(),
        );
    }

    let state = ServerState {
        settings_store,
        session_store,
        object_store,
        vision,
        job_queue: job_queue.clone(),
        audit,
        authenticator: Arc::new(authenticator),
        progress,
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            shutdown.cancel();
        })?;
    }

    let worker_shutdown = shutdown.clone();
    let workers = tokio::spawn(async move {
        job_queue.run(processor, worker_shutdown).await;
    });

    run_server(state, config.port, shutdown).await?;
    let _ = workers.await;
    info!("Goodbye");
    Ok(())
}
