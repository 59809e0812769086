pub mod error;
pub mod service;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router, Json,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::AppState;
use crate::transport::SERVICE_PATH;

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "wp-synchro",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// 创建 API 路由
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.settings.max_post_size).unwrap_or(usize::MAX);
    Router::new()
        // Health check
        .route("/api/health", get(health_check))

        // 站点间服务与管理接口
        .route(SERVICE_PATH, get(service::handle).post(service::handle))

        .layer(DefaultBodyLimit::max(body_limit))

        // CORS 配置
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())

        // 共享状态
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::services::testing::TwoSites;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_routes() {
        let sites = TwoSites::new(Direction::Pull).await;
        let router = create_router(sites.source.state.clone());

        let response = router
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(
                Request::post("/wpsynchro?action=wpsynchro_test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"it-works");

        let response = router
            .oneshot(
                Request::get("/wpsynchro?action=wpsynchro_masterdata")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
