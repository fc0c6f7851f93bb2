//! 数据结构定义

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

/// 限流触发时的响应正文
pub const THROTTLED_MESSAGE: &str = "Excessive frequency of requests";

/// 窗口内允许的最大请求数
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// 当前窗口内剩余的请求数
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// 单次请求的限流判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// 是否放行
    pub allowed: bool,
    /// 剩余可用请求数
    pub remaining: u64,
    /// 建议重试等待时间（秒，仅在拒绝时存在）
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    /// 拒绝时剩余次数固定为 0
    pub fn throttled(retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

/// 为响应添加限流相关头
///
/// 按名称覆盖写入，重复调用不会产生重复的头
pub fn add_headers(headers: &mut HeaderMap, max_attempts: u64, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(max_attempts));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    if let Some(retry_after) = decision.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
}
