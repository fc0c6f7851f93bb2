//! 固定窗口限流中间件
//!
//! 按请求签名计数，超限时直接返回 429，否则放行并附加限流响应头

pub mod middleware;
pub mod policy;
pub mod signature;
pub mod types;

pub use middleware::{ThrottleMiddleware, throttle_middleware};
pub use policy::{PolicyTable, ThrottlePolicy};
pub use signature::{FingerprintResolver, RequestSignature, SignatureResolver};
pub use types::{RateLimitDecision, THROTTLED_MESSAGE, add_headers};
