use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::cancellable_sse::cancel_stream;
use crate::handlers::*;
use crate::middleware::trace_requests;
use crate::state::AppState;

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tweak/stream", post(tweak_stream))
        .route("/app/tweak/stream", post(tweak_stream_json))
        .route("/api/create-stream", get(create_stream))
        .route("/api/cancel-stream", get(cancel_stream))
        .layer(middleware::from_fn(trace_requests))
        .with_state(app_state)
}
