//! HTTP API module
//!
//! The feedback receiver: accepts timeout captures and manual submissions
//! posted by the client and keeps them in memory.

pub mod handlers;
pub mod responses;

use std::sync::Arc;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{services::transport::SUBMIT_PATH, state::ReceiverState};
use handlers::*;

/// Upload cap for a submission with images
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route(SUBMIT_PATH, post(submit_feedback_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
