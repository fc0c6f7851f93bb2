//! API 路由

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::throttle::{ThrottleMiddleware, throttle_middleware};

/// 完整应用：限流的 API 路由 + 不限流的运维路由
pub fn app(throttle: Arc<ThrottleMiddleware>, metrics: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .merge(health_routes())
        .merge(api_routes(throttle));

    if let Some(handle) = metrics {
        router = router.merge(metrics_routes(handle));
    }

    router.layer(TraceLayer::new_for_http())
}

/// 受限流保护的业务路由
pub fn api_routes(throttle: Arc<ThrottleMiddleware>) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/echo", post(echo))
        .layer(middleware::from_fn_with_state(throttle, throttle_middleware))
}

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}

pub fn metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: String,
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
    })
}

async fn echo(Json(payload): Json<Value>) -> Json<Value> {
    Json(payload)
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
