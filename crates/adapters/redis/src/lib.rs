//! throttle-adapter-redis - Redis 限流适配器

mod connection;
mod rate_limiter;

pub use connection::*;
pub use rate_limiter::*;
