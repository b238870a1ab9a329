use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

mod handlers;

use crate::config::Config;
use crate::conformity::Checker;
use crate::queue::QueueManager;
use crate::storage::Store;

pub const SERVICE_NAME: &str = "mr-conform";

/// Shared state behind every handler. Handlers only validate, parse and
/// enqueue; checks run in the queue's drain loop (the status endpoint is
/// the one synchronous exception).
pub struct AppState {
    pub config: Config,
    pub checker: Arc<Checker>,
    pub queue: Arc<QueueManager>,
    pub store: Arc<Store>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhook", post(handlers::webhook))
        .route("/status/{project_id}/{mr_id}", get(handlers::status))
        .with_state(state)
}
