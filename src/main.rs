use anyhow::Result;
use filevault::api::{self, extractors::AppState};
use filevault::repositories::{FileRepository, MetadataStore};
use filevault::services::{secret_store_from_config, FileService, UrlSigner};
use filevault::{AppConfig, Database};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filevault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::new()?;
    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting Filevault server on {}", bind_address);

    // Initialize database
    let database = match Database::new(&config.database.url, config.database.max_connections).await {
        Ok(db) => {
            info!("Database connected successfully");
            db
        }
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return Err(e);
        }
    };

    // Initialize the metadata table
    let repository = FileRepository::new(database.pool().clone(), &config.files.table)?;
    if let Err(e) = repository.ensure_table().await {
        error!("Failed to prepare metadata table {}: {}", config.files.table, e);
        return Err(e.into());
    }
    info!("Metadata table {} ready", repository.table());
    let store: Arc<dyn MetadataStore> = Arc::new(repository);

    // Initialize secret store and URL signer
    let secrets = secret_store_from_config(&config.secrets)?;
    let signer = UrlSigner::new(
        secrets,
        config.secrets.private_key_name.clone(),
        config.secrets.key_pair_id_name.clone(),
        config.cdn.url_validity(),
    );
    info!(
        "URL signer initialized for {} with {}s validity",
        config.cdn.base_url,
        signer.validity().as_secs()
    );

    if config.files.expose_list_all {
        warn!("Unscoped file listing is enabled at /api/files");
    }

    let file_service = Arc::new(FileService::new(store, signer, &config.cdn.base_url));

    // Create application state
    let app_state = AppState { database, file_service, config: config.clone() };

    // Build application router
    let app = api::create_app(app_state).await?;

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!("Server listening on http://{}", bind_address);

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
