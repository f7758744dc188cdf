// Route table for the flowrun API

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

/// `body_limit` replaces axum's 2 MB default so size checks answer with a 400
pub fn routes(body_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::submit))
        .route("/submissions/async", post(handlers::submit_async))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/languages", get(handlers::list_languages))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
}
