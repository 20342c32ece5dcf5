pub mod html_state;
pub mod middlewares;
pub mod routes;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use html_state::HtmlState;
use middlewares::response_middleware::with_template_response;
use tower_http::compression::CompressionLayer;

pub type OpenAIClientType = async_openai::Client<async_openai::config::OpenAIConfig>;

#[macro_export]
macro_rules! create_asset_service {
    // Takes the relative path to the asset directory
    ($relative_path:expr) => {{
        #[cfg(debug_assertions)]
        {
            let crate_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            let assets_path = crate_dir.join($relative_path);
            tracing::debug!("Assets: Serving from filesystem: {:?}", assets_path);
            tower_http::services::ServeDir::new(assets_path)
        }
        #[cfg(not(debug_assertions))]
        {
            tracing::debug!("Assets: Serving embedded directory");
            static ASSETS_DIR: include_dir::Dir<'static> =
                include_dir::include_dir!("$CARGO_MANIFEST_DIR/assets");
            tower_serve_static::ServeDir::new(&ASSETS_DIR)
        }
    }};
}

/// Html routes
pub fn html_routes<S>(app_state: &HtmlState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    HtmlState: FromRef<S>,
{
    Router::new()
        .route("/", get(routes::index::index_handler))
        .route("/ask", post(routes::ask::ask_handler))
        .route(
            "/upload",
            post(routes::documents::upload_handler).layer(DefaultBodyLimit::max(
                app_state.config.upload_max_body_bytes,
            )),
        )
        .route(
            "/documents/{id}",
            delete(routes::documents::delete_document_handler),
        )
        .nest_service("/assets", create_asset_service!("assets"))
        .layer(from_fn_with_state(
            app_state.clone(),
            with_template_response::<HtmlState>,
        ))
        .layer(CompressionLayer::new())
}
