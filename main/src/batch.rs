//! Bulk ingestion over the data directory: every PDF that is not already
//! indexed (by file name) is parsed and added to the vector index. Use the
//! server's upload endpoint for one-off additions.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use common::{
    storage::{db::SurrealDbClient, store::StorageManager, types::document::Document},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{parse::ParseClient, pipeline::IngestionPipeline};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    config.validate()?;
    config.log_summary();

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

    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;

    let existing = Document::count(&db).await?;
    info!(documents_indexed = existing, "Connected to vector database");

    let parse_client = ParseClient::from_config(&config)?;
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config));
    let storage = StorageManager::new(&config).await?;
    let pipeline = IngestionPipeline::new(db.clone(), parse_client, embedding_provider, storage);

    let files = scan_pdf_files(Path::new(&config.data_dir)).await?;
    if files.is_empty() {
        warn!(data_dir = %config.data_dir, "No PDF files found");
        return Ok(());
    }
    info!(count = files.len(), data_dir = %config.data_dir, "Found PDF files");

    let mut added = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for (position, path) in files.iter().enumerate() {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        // Mirrors the upload path's dedup, but by name: a re-run of the
        // batch over the same directory adds nothing twice.
        if Document::find_by_file_name(&file_name, &db).await?.is_some() {
            info!(%file_name, "Already indexed, skipping");
            skipped += 1;
            continue;
        }

        info!(
            %file_name,
            position = position + 1,
            total = files.len(),
            "Ingesting"
        );

        let sha256 = match sha256_of_file(path).await {
            Ok(sha256) => sha256,
            Err(err) => {
                error!(%file_name, error = %err, "Failed to read PDF");
                failed += 1;
                continue;
            }
        };

        let document = Document::new(
            file_name.clone(),
            sha256,
            path.to_string_lossy().into_owned(),
        );
        db.store_item(document.clone()).await?;

        match pipeline
            .ingest_document(&document.id, path, &file_name)
            .await
        {
            Ok(page_count) => {
                info!(%file_name, document_id = %document.id, page_count, "Indexed");
                added += 1;
            }
            Err(err) => {
                error!(%file_name, error = %err, "Ingestion failed");
                if let Err(mark_err) =
                    Document::mark_failed(&document.id, &err.to_string(), &db).await
                {
                    warn!(error = %mark_err, "Could not flag failed document");
                }
                failed += 1;
            }
        }
    }

    info!(
        added,
        skipped,
        failed,
        total_indexed = Document::count(&db).await?,
        "Batch ingestion finished"
    );

    Ok(())
}

async fn scan_pdf_files(data_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(data_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_pdf = path
            .extension()
            .map(|ext| ext.to_ascii_lowercase() == "pdf")
            .unwrap_or(false);
        if is_pdf {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

async fn sha256_of_file(path: &Path) -> Result<String, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}
