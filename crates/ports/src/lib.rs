//! ports - 抽象 trait 层
//!
//! 定义限流器与时钟的抽象接口

mod clock;
mod rate_limiter;

pub use clock::*;
pub use rate_limiter::*;
