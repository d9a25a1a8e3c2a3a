pub mod pages;
pub mod predict;
pub mod records;

use axum::Router;
use std::sync::Arc;

use crate::AppState;
use crate::config::Config;

/// Build all routes for the API
pub fn build_routes(config: &Config) -> Router<Arc<AppState>> {
    Router::new()
        .merge(pages::routes(&config.static_dir))
        .merge(predict::routes())
        .merge(records::routes())
}
