//! throttle-adapter-memory - 进程内限流器

mod clock;
mod rate_limiter;

pub use clock::*;
pub use rate_limiter::*;
