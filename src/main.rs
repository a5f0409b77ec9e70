use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Payment screenshot verification service for event registrations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP port to listen on (overrides HTTP_PORT)
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Directory containing events.json (overrides DATA_PATH)
    #[arg(long)]
    data_path: Option<String>,

    /// Directory for the verification database (overrides STATE_PATH)
    #[arg(long)]
    state_path: Option<String>,

    /// Number of log lines kept for the admin log endpoints
    #[arg(long, default_value_t = 1000)]
    log_buffer: usize,
}

mod adapters;
mod config;
mod error;
mod extract;
mod logging;
mod managers;
mod state;
mod web;

use adapters::Adapters;
use config::{AppConfig, EventCatalog};
use managers::create_shared_verification_manager;
use state::{create_shared_database, Database};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Create log buffer for the admin log endpoints
    let log_buffer = logging::create_log_buffer(args.log_buffer);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(data_path) = args.data_path {
        config.data_path = data_path;
    }
    if let Some(state_path) = args.state_path {
        config.state_path = state_path;
    }

    // Ensure state and upload directories exist
    tokio::fs::create_dir_all(&config.state_path).await?;
    tokio::fs::create_dir_all(&config.upload_path).await?;

    info!("Loading events from {}...", config.events_file());
    let events = match EventCatalog::load_from_file(&config.events_file()) {
        Ok(catalog) if catalog.is_empty() => {
            warn!("events.json lists no events; every upload will be rejected");
            catalog
        }
        Ok(catalog) => {
            info!("Loaded {} events", catalog.len());
            catalog
        }
        Err(e) => {
            error!("Failed to load events: {}", e);
            warn!("Continuing with no events; every upload will be rejected");
            EventCatalog::default()
        }
    };

    info!("Loading verification database...");
    let database_path = config.database_file();
    let database = Database::load(&database_path).await.map_err(|e| {
        error!("Could not load verification database: {}", e);
        e
    })?;
    let shared_database = create_shared_database(database);

    let verification_manager = create_shared_verification_manager(
        shared_database,
        Some(database_path),
        Arc::new(events),
        Adapters::from_config(&config),
    );

    let state = web::AppState {
        verification_manager,
        admins: web::create_admin_registry(&config.admin_tokens),
        log_buffer,
    };

    if let Err(e) = web::start_web_server(&config, state).await {
        error!("Web server error: {}", e);
        return Err(e);
    }

    warn!("Web server stopped.");
    Ok(())
}
