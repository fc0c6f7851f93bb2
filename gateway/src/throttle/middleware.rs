//! 限流中间件
//!
//! 流程：
//! 1. 解析请求签名
//! 2. 已达上限：直接返回 429，不调用下游，不记录命中
//! 3. 未达上限：记录一次命中，调用下游，为响应附加剩余次数

use crate::error::ApiError;
use crate::throttle::policy::{PolicyTable, ThrottlePolicy};
use crate::throttle::signature::{FingerprintResolver, RequestSignature, SignatureResolver};
use crate::throttle::types::{RateLimitDecision, THROTTLED_MESSAGE, add_headers};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::sync::Arc;
use throttle_errors::{AppError, AppResult};
use throttle_ports::RateLimiter;
use tracing::{debug, warn};

/// 限流中间件状态
#[derive(Clone)]
pub struct ThrottleMiddleware {
    /// 限流器
    limiter: Arc<dyn RateLimiter>,
    /// 签名解析器
    resolver: Arc<dyn SignatureResolver>,
    /// 策略表
    policies: PolicyTable,
}

impl ThrottleMiddleware {
    /// 使用默认签名解析器和默认策略（60 次 / 60 秒）
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            resolver: Arc::new(FingerprintResolver),
            policies: PolicyTable::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SignatureResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// 按请求路径选择策略后处理请求
    pub async fn handle<F, Fut, E>(&self, request: Request, next: F) -> Result<Response, E>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Response, E>>,
        E: From<AppError>,
    {
        let policy = self.policies.resolve(request.uri().path());
        self.handle_with(policy, request, next).await
    }

    /// 以指定策略处理请求
    ///
    /// 下游返回的错误原样向上传递，不附加限流头
    pub async fn handle_with<F, Fut, E>(
        &self,
        policy: ThrottlePolicy,
        request: Request,
        next: F,
    ) -> Result<Response, E>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<Response, E>>,
        E: From<AppError>,
    {
        let max_attempts = policy.max_attempts();
        let key = self.resolve_request_signature(&request);

        if self
            .limiter
            .too_many_attempts(key.as_str(), max_attempts)
            .await?
        {
            warn!(
                signature = %key,
                endpoint = %request.uri().path(),
                method = %request.method(),
                max_attempts,
                "Rate limit exceeded"
            );
            return Ok(self.build_response(&key, max_attempts).await?);
        }

        self.limiter
            .hit(key.as_str(), policy.decay_seconds())
            .await?;

        let mut response = next(request).await?;

        let remaining = self
            .calculate_remaining_attempts(&key, max_attempts, None)
            .await?;

        debug!(signature = %key, max_attempts, remaining, "Request allowed");

        add_headers(
            response.headers_mut(),
            max_attempts,
            &RateLimitDecision::allowed(remaining),
        );

        Ok(response)
    }

    fn resolve_request_signature(&self, request: &Request) -> RequestSignature {
        self.resolver.resolve(request)
    }

    /// 构建 429 响应
    async fn build_response(&self, key: &RequestSignature, max_attempts: u64) -> AppResult<Response> {
        let body = serde_json::to_string(THROTTLED_MESSAGE)
            .map_err(|e| AppError::internal(format!("Failed to encode throttle body: {}", e)))?;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();

        let retry_after = self.limiter.available_in(key.as_str()).await?;
        let remaining = self
            .calculate_remaining_attempts(key, max_attempts, Some(retry_after))
            .await?;

        add_headers(
            response.headers_mut(),
            max_attempts,
            &RateLimitDecision {
                allowed: false,
                remaining,
                retry_after: Some(retry_after),
            },
        );

        Ok(response)
    }

    /// 计算剩余次数
    ///
    /// 一旦限流（`retry_after` 存在）固定报告 0，不读取计数
    async fn calculate_remaining_attempts(
        &self,
        key: &RequestSignature,
        max_attempts: u64,
        retry_after: Option<u64>,
    ) -> AppResult<u64> {
        if retry_after.is_some() {
            return Ok(0);
        }

        self.limiter.retries_left(key.as_str(), max_attempts).await
    }
}

/// Axum 中间件函数
pub async fn throttle_middleware(
    State(state): State<Arc<ThrottleMiddleware>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();

    state
        .handle(request, |request| async move {
            Ok::<_, ApiError>(next.run(request).await)
        })
        .await
        .map_err(|e| e.with_instance(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderValue, header};
    use mockall::mock;
    use std::sync::atomic::{AtomicBool, Ordering};

    mock! {
        pub Limiter {}

        #[async_trait]
        impl RateLimiter for Limiter {
            async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> AppResult<bool>;
            async fn hit(&self, key: &str, decay_seconds: u64) -> AppResult<u64>;
            async fn attempts(&self, key: &str) -> AppResult<u64>;
            async fn reset_attempts(&self, key: &str) -> AppResult<()>;
            async fn retries_left(&self, key: &str, max_attempts: u64) -> AppResult<u64>;
            async fn clear(&self, key: &str) -> AppResult<()>;
            async fn available_in(&self, key: &str) -> AppResult<u64>;
        }
    }

    /// 固定签名，便于断言调用参数
    struct StaticResolver;

    impl SignatureResolver for StaticResolver {
        fn resolve(&self, _request: &Request) -> RequestSignature {
            RequestSignature::new("client-a")
        }
    }

    fn middleware(limiter: MockLimiter) -> ThrottleMiddleware {
        ThrottleMiddleware::new(Arc::new(limiter)).with_resolver(Arc::new(StaticResolver))
    }

    fn request(path: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn ok_downstream(_request: Request) -> Result<Response, AppError> {
        Ok(Response::new(Body::from("ok")))
    }

    #[tokio::test]
    async fn test_allowed_request_records_hit_and_adds_headers() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .withf(|key, max| key == "client-a" && *max == 60)
            .times(1)
            .returning(|_, _| Ok(false));
        limiter
            .expect_hit()
            .withf(|key, decay| key == "client-a" && *decay == 60)
            .times(1)
            .returning(|_, _| Ok(1));
        limiter
            .expect_retries_left()
            .times(1)
            .returning(|_, _| Ok(59));
        limiter.expect_available_in().never();

        let response = middleware(limiter)
            .handle_with(ThrottlePolicy::default(), request("/api/ping"), ok_downstream)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_throttled_request_short_circuits() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .times(1)
            .returning(|_, _| Ok(true));
        limiter.expect_hit().never();
        limiter.expect_retries_left().never();
        limiter
            .expect_available_in()
            .times(1)
            .returning(|_| Ok(42));

        let called = AtomicBool::new(false);
        let response = middleware(limiter)
            .handle_with(
                ThrottlePolicy::new(2, 60).unwrap(),
                request("/api/ping"),
                |_request| async {
                    called.store(true, Ordering::SeqCst);
                    Ok::<_, AppError>(Response::new(Body::empty()))
                },
            )
            .await
            .unwrap();

        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#""Excessive frequency of requests""#);
    }

    #[tokio::test]
    async fn test_downstream_error_passes_through() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .returning(|_, _| Ok(false));
        limiter.expect_hit().times(1).returning(|_, _| Ok(1));
        limiter.expect_retries_left().never();

        let result = middleware(limiter)
            .handle_with(ThrottlePolicy::default(), request("/api/ping"), |_request| async {
                Err::<Response, _>(AppError::external_service("upstream exploded"))
            })
            .await;

        match result {
            Err(AppError::ExternalService(msg)) => assert_eq!(msg, "upstream exploded"),
            other => panic!("unexpected result: {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn test_limiter_error_propagates() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .returning(|_, _| Err(AppError::internal("redis down")));
        limiter.expect_hit().never();

        let called = AtomicBool::new(false);
        let result = middleware(limiter)
            .handle_with(ThrottlePolicy::default(), request("/api/ping"), |_request| async {
                called.store(true, Ordering::SeqCst);
                Ok::<_, AppError>(Response::new(Body::empty()))
            })
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_existing_headers_are_preserved_and_overwritten_by_name() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .returning(|_, _| Ok(false));
        limiter.expect_hit().returning(|_, _| Ok(3));
        limiter.expect_retries_left().returning(|_, _| Ok(7));

        let response = middleware(limiter)
            .handle_with(
                ThrottlePolicy::new(10, 60).unwrap(),
                request("/api/ping"),
                |_request| async {
                    let mut response = Response::new(Body::empty());
                    let headers = response.headers_mut();
                    headers.insert("x-request-id", HeaderValue::from_static("abc"));
                    headers.insert("x-ratelimit-limit", HeaderValue::from_static("999"));
                    Ok::<_, AppError>(response)
                },
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "abc");
        assert_eq!(
            response.headers().get_all("x-ratelimit-limit").iter().count(),
            1
        );
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "7");
    }

    #[tokio::test]
    async fn test_remaining_is_zero_once_throttled() {
        let mut limiter = MockLimiter::new();
        limiter.expect_retries_left().never();

        let remaining = middleware(limiter)
            .calculate_remaining_attempts(&RequestSignature::new("client-a"), 60, Some(5))
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_handle_resolves_route_policy() {
        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .withf(|_, max| *max == 5)
            .times(1)
            .returning(|_, _| Ok(false));
        limiter
            .expect_hit()
            .withf(|_, decay| *decay == 10)
            .times(1)
            .returning(|_, _| Ok(1));
        limiter.expect_retries_left().returning(|_, _| Ok(4));

        let policies =
            PolicyTable::default().with_route("/api/echo", ThrottlePolicy::new(5, 10).unwrap());
        let response = middleware(limiter)
            .with_policies(policies)
            .handle(request("/api/echo"), ok_downstream)
            .await
            .unwrap();

        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    }

    #[tokio::test]
    async fn test_limiter_failure_renders_problem_with_path() {
        use axum::{Router, routing::get};
        use tower::ServiceExt;

        let mut limiter = MockLimiter::new();
        limiter
            .expect_too_many_attempts()
            .returning(|_, _| Err(AppError::internal("redis down")));
        limiter.expect_hit().never();

        let app = Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(middleware(limiter)),
                throttle_middleware,
            ));

        let response = app.oneshot(request("/api/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["instance"], "/api/ping");
    }
}
