// Web服务器模块

pub mod error;
pub mod events;
pub mod handlers;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_size_mb * 1024 * 1024;

    // 配置中间件层
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(cors_layer(&state.config.server.cors_origins));

    // API 路由
    let api_routes = Router::new()
        .route(
            "/uploads",
            post(handlers::submit_uploads).get(handlers::get_uploads),
        )
        .route("/uploads/progress", get(handlers::get_upload_progress))
        .route("/uploads/ws", get(websocket::handle_websocket))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health_check))
        .layer(middleware)
        .with_state(state)
}

/// 按配置构建 CORS 层，`*` 表示允许任意来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("忽略无效的 CORS 来源: {}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::server::events::UploadEvent;
    use crate::uploader::{
        ConfigurationError, Destination, DestinationResolver, FileHandle, ResolutionError,
        SchedulerOptions, TransferError, Transporter, UploadScheduler,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use reqwest::Url;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-UPLOAD-BOUNDARY";

    struct InstantResolver;

    #[async_trait]
    impl DestinationResolver for InstantResolver {
        fn ensure_configured(&self) -> Result<(), ConfigurationError> {
            Ok(())
        }

        async fn resolve(
            &self,
            file_name: &str,
            _content_type: &str,
        ) -> Result<Destination, ResolutionError> {
            Ok(Destination {
                url: Url::parse(&format!("https://storage.test/{}", file_name)).unwrap(),
                headers: HashMap::new(),
            })
        }
    }

    struct InstantTransporter;

    #[async_trait]
    impl Transporter for InstantTransporter {
        async fn transfer(
            &self,
            file: &FileHandle,
            _destination: Destination,
            on_progress: &(dyn Fn(u64, u64) + Send + Sync),
        ) -> Result<(), TransferError> {
            on_progress(file.size(), file.size());
            Ok(())
        }
    }

    fn test_state() -> AppState {
        let scheduler = UploadScheduler::new(
            Arc::new(InstantResolver),
            Arc::new(InstantTransporter),
            SchedulerOptions::default(),
        )
        .unwrap();
        AppState::with_scheduler(AppConfig::default(), scheduler)
    }

    fn multipart_body(parts: &[(&str, &str, &str)]) -> String {
        let mut body = String::new();
        for (file_name, content_type, content) in parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload_request(parts: &[(&str, &str, &str)]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/uploads")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_progress_empty_before_submission() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::get("/api/v1/uploads/progress")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["code"], 0);
        assert!(json["data"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_and_observe_batch() {
        let state = test_state();
        let mut events = state.scheduler.subscribe();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(upload_request(&[
                ("photo.png", "image/png", "PNGDATA"),
                ("report.pdf", "application/pdf", "PDFDATA"),
                ("notes.txt", "text/plain", "hello"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["data"]["batch_id"], 1);
        assert_eq!(json["data"]["total"], 2);
        assert_eq!(json["data"]["rejected"][0]["file_name"], "notes.txt");

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(UploadEvent::BatchFinished { .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/uploads").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        let entries = json["data"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["file_name"], "photo.png");
        assert!(entries
            .iter()
            .all(|entry| entry["status"] == "completed" && entry["progress"] == 100));
        assert_eq!(json["data"]["report"]["completed"], 2);

        let response = app
            .oneshot(
                Request::get("/api/v1/uploads/progress")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["data"]["photo.png"], 100);
        assert_eq!(json["data"]["report.pdf"], 100);
    }

    #[tokio::test]
    async fn test_submit_without_api_url() {
        let app = build_router(AppState::new(AppConfig::default()).unwrap());

        let response = app
            .oneshot(upload_request(&[("photo.png", "image/png", "PNGDATA")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_body(response).await;
        assert_eq!(json["code"], error::CODE_NOT_CONFIGURED);
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_submit_duplicate_names() {
        let app = build_router(test_state());

        let response = app
            .oneshot(upload_request(&[
                ("photo.png", "image/png", "one"),
                ("photo.png", "image/png", "two"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], error::CODE_DUPLICATE_FILE);
    }

    #[test]
    fn test_cors_layer_accepts_origin_list() {
        // 无效来源被忽略，不影响构建
        let _ = cors_layer(&["http://localhost:5173".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
