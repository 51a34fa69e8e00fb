use axum::{Router, routing::get};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::renderer::Renderer;
use crate::search_client::SearchClient;

pub mod handlers;
pub mod models;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub search_client: Arc<SearchClient>,
    pub renderer: Arc<Renderer>,
}

impl AppState {
    pub fn new(config: Config, search_client: SearchClient) -> Self {
        let renderer = Renderer::from_config(&config);
        Self {
            config: Arc::new(config),
            search_client: Arc::new(search_client),
            renderer: Arc::new(renderer),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(handlers::landing_handler))
        .route("/search", get(handlers::handle_search))
        // Static assets (stylesheet, images) straight from disk
        .nest_service("/static", static_files)
        .fallback(handlers::not_found_handler)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
