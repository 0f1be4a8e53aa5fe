#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use renamer_api::config::ApiConfig;
use renamer_api::router::build_app_router;
use renamer_api::state::AppState;
use renamer_events::{HistoryConfig, MemoryHistory, ProgressBus};
use tower::ServiceExt;

pub fn test_config() -> ApiConfig {
    ApiConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".into()],
        ..Default::default()
    }
}

/// Bus with an in-memory history so replay and polling have data.
pub fn memory_bus() -> Arc<ProgressBus> {
    Arc::new(ProgressBus::new(Arc::new(MemoryHistory::new(
        HistoryConfig::default(),
    ))))
}

pub fn build_test_app(bus: Arc<ProgressBus>) -> Router {
    build_app_router(AppState::new(bus, test_config()))
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serve the app on an ephemeral local port.
pub async fn spawn_server(bus: Arc<ProgressBus>) -> SocketAddr {
    let app = build_test_app(bus);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
