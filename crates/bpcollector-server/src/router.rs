//! Route table for the collector HTTP contract, factored out of `main` so
//! integration tests can build the same `Router` without binding a socket.

use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/submit", post(handlers::submit))
        .route("/__lbheartbeat__", get(handlers::lb_heartbeat))
        .route("/__heartbeat__", get(handlers::heartbeat))
        .route("/__version__", get(handlers::version))
        .route("/__broken__", get(handlers::broken))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
