use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    documents::{get_document, list_documents, remove_document, replace_document, upload_document},
    health::{health, live, ready},
    images::get_page_image,
    query::query_documents,
};
use tower_http::cors::CorsLayer;

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes and health (for k8s/systemd and the original /health contract)
    let probes = Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/health", get(health));

    // Document CRUD; uploads are bounded by the configured body limit
    let documents = Router::new()
        .route("/documents", post(upload_document).get(list_documents))
        .route(
            "/documents/{id}",
            get(get_document)
                .put(replace_document)
                .delete(remove_document),
        )
        .layer(DefaultBodyLimit::max(
            app_state.config.upload_max_body_bytes,
        ));

    let query = Router::new().route("/query", post(query_documents));

    let images = Router::new().route("/images/{document_id}/{page_number}", get(get_page_image));

    // The API is consumed cross-origin by external frontends; mirror the
    // original's open CORS posture.
    probes
        .merge(documents)
        .merge(query)
        .merge(images)
        .layer(CorsLayer::permissive())
}
