use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, types::document::Document},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use html_router::{html_routes, html_state::HtmlState};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
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

    // Set up router states
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

    let html_state =
        HtmlState::new_with_resources(db, llm_client, storage, config.clone(), embedding_provider);

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .merge(html_routes(&html_state))
        .with_state(AppState {
            api_state,
            html_state,
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
