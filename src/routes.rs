use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Create static file routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::serve))
        .route("/*path", get(handlers::serve))
}

/// Build the complete service for one server instance.
///
/// Per-request tracing is only attached when verbose logging is configured.
pub fn build_router(state: AppState) -> Router {
    let verbose = state.config.verbose_logging;
    let router = file_routes().with_state(state);

    if verbose {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
