use axum::{extract::DefaultBodyLimit, middleware, routing::post, Router};

use shared_utils::extractor::{auth_middleware, require_clinician};

use crate::handlers::*;

/// Public scan page: unauthenticated, the identifier is the capability.
pub fn scan_routes(state: ScanState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/manual", post(manual_scan))
        .route("/upload", post(upload_scan))
        .route("/decode", post(decode_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Doctor scan page: bearer token required and forwarded to the lookup.
pub fn doctor_scan_routes(state: ScanState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    let config = state.config.clone();

    Router::new()
        .route("/manual", post(doctor_manual_scan))
        .route("/upload", post(doctor_upload_scan))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(require_clinician))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
