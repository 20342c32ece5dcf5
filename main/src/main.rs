use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, types::document::Document},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use html_router::{html_routes, html_state::HtmlState};
use ingestion_pipeline::{parse::ParseClient, pipeline::IngestionPipeline, run_worker_loop};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    config.validate()?;
    config.log_summary();

    // Set up shared resources
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;

    let llm_client = Arc::new(async_openai::Client::with_config(
        config.llm_client_config(),
    ));
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config));
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Page image store
    let storage = StorageManager::new(&config).await?;

    match Document::count(&db).await {
        Ok(count) => info!(documents_indexed = count, "Vector index loaded"),
        Err(err) => warn!(error = %err, "Could not count indexed documents"),
    }

    let api_state = ApiState::with_resources(
        db.clone(),
        &config,
        storage.clone(),
        llm_client.clone(),
        embedding_provider.clone(),
    );

    let html_state = HtmlState::new_with_resources(
        db.clone(),
        llm_client,
        storage.clone(),
        config.clone(),
        embedding_provider.clone(),
    );

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .merge(html_routes(&html_state))
        .with_state(AppState {
            api_state,
            html_state,
        });

    // Run the ingestion worker inside the same process
    let parse_client = ParseClient::from_config(&config)?;
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        parse_client,
        embedding_provider,
        storage,
    ));
    let worker_db = db.clone();
    tokio::spawn(async move {
        info!("Starting worker process");
        if let Err(e) = run_worker_loop(worker_db, ingestion_pipeline).await {
            error!("Worker process error: {}", e);
        }
    });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
    html_state: HtmlState,
}
