//! 请求签名
//!
//! 签名是限流计数的键，同一客户端对同一路由的请求得到相同签名

use axum::extract::{ConnectInfo, Request};
use axum::http::header;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

/// 请求签名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 签名解析器
pub trait SignatureResolver: Send + Sync {
    fn resolve(&self, request: &Request) -> RequestSignature;
}

/// 默认解析器
///
/// `sha256(METHOD|host|path|client_ip)` 的十六进制表示
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintResolver;

impl SignatureResolver for FingerprintResolver {
    fn resolve(&self, request: &Request) -> RequestSignature {
        let host = request
            .uri()
            .host()
            .or_else(|| {
                request
                    .headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
            })
            .unwrap_or("");

        let raw = format!(
            "{}|{}|{}|{}",
            request.method(),
            host,
            request.uri().path(),
            client_ip(request)
        );

        RequestSignature(hex::encode(Sha256::digest(raw.as_bytes())))
    }
}

/// 提取客户端 IP
///
/// 依次尝试 `X-Forwarded-For` 的第一个地址、`X-Real-IP`、连接对端地址
pub fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim())
        })
        .map(|s| s.to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
