//! Clock trait 定义

use std::time::Instant;

/// 单调时钟
///
/// 限流窗口的过期判断依赖它，测试中可替换为手动推进的实现
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}
