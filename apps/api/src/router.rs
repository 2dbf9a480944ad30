use axum::{
    Router,
    routing::get,
};

use qr_scan_cell::{doctor_scan_routes, scan_routes, ScanState};

pub fn create_router(state: ScanState) -> Router {
    Router::new()
        .route("/", get(|| async { "Patient scan API is running!" }))
        .nest("/scan", scan_routes(state.clone()))
        .nest("/doctor/scan", doctor_scan_routes(state))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    use shared_config::AppConfig;

    use super::*;

    fn app() -> Router {
        let state = ScanState::new(Arc::new(AppConfig::default())).unwrap();
        create_router(state)
    }

    #[tokio::test]
    async fn test_liveness_route() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scan_routes_are_mounted() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/doctor/scan/manual")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
