//! API router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use mydocker_core::Daemon;

use crate::handlers;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// The daemon core.
    pub daemon: Arc<Daemon>,
}

/// Creates the API router with all endpoints.
#[must_use]
pub fn create_router(daemon: Arc<Daemon>) -> Router {
    let state = AppState { daemon };

    Router::new()
        .route("/containers/create", post(handlers::create_container))
        .route("/containers/list", get(handlers::list_containers))
        .route("/containers/stop", post(handlers::stop_container))
        .with_state(state)
}
