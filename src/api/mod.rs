pub mod health;
pub mod positions;
pub mod rebuild;

use crate::db::Repository;
use crate::orchestration::Orchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { repo, orchestrator }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::list_positions))
        .route("/v1/positions/:id", get(positions::get_position))
        .route("/v1/rebuild", post(rebuild::trigger_rebuild))
        .layer(cors)
        .with_state(state)
}
