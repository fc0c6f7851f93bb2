//! throttle-gateway - 带固定窗口限流的 API 网关

pub mod error;
pub mod limiter;
pub mod routing;
pub mod throttle;

pub use error::ApiError;
pub use throttle::{PolicyTable, ThrottleMiddleware, ThrottlePolicy, throttle_middleware};
