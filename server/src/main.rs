//! Ripple Server binary.

use std::sync::Arc;

use tokio::sync::broadcast;

use ripple_server::{app, init_tracing, AppState, Config, DatabaseRegistry, ReplicationServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Ripple Server on {}:{}", config.host, config.port);

    let schemas = config.load_schemas()?;
    for schema in &schemas {
        tracing::info!(db = %schema.name, version = schema.version, collections = schema.collections.len(), "hosting database");
    }
    let registry = DatabaseRegistry::with_schemas(schemas).await?;
    let server = Arc::new(ReplicationServer::new(registry));

    // Log connection lifecycle
    let mut lifecycle = server.subscribe_lifecycle();
    tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(event) => tracing::debug!(?event, "lifecycle"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "lifecycle log lagging")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let state = AppState {
        server,
        config: Arc::new(config.clone()),
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
