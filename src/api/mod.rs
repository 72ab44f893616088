pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::service::SqlService;

/// Shared across requests. Each request still opens its own database
/// connection and model client.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SqlService>,
}

impl AppState {
    pub fn new(service: SqlService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate-sql/", post(handlers::generate_sql))
        .route("/generate-sql", post(handlers::generate_sql))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
