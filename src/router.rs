use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        // DHCP server webhooks
        .route("/ipv4", get(handlers::dhcp::offer))
        .route("/ipv4/lease", post(handlers::dhcp::lease))
        .route("/ipv4/seen", post(handlers::dhcp::seen))
        .route("/ipv4/subnet", post(handlers::dhcp::subnet))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
