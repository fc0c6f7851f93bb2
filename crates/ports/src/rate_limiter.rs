//! RateLimiter trait 定义

use async_trait::async_trait;
use throttle_errors::AppResult;

/// 固定窗口限流器
///
/// 以签名（key）为计数单位。第一次 `hit` 开启一个长度为 `decay_seconds`
/// 的窗口，窗口内的计数只增不减，窗口到期后自动归零。
///
/// 同一时刻 `retries_left` 与 `too_many_attempts` 的结果必须一致。
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 当前窗口内的尝试次数是否已达到上限
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> AppResult<bool>;

    /// 记录一次尝试，返回递增后的计数
    ///
    /// 仅在窗口尚未开启时设置过期时间，后续命中不会延长窗口
    async fn hit(&self, key: &str, decay_seconds: u64) -> AppResult<u64>;

    /// 当前窗口内的尝试次数
    async fn attempts(&self, key: &str) -> AppResult<u64>;

    /// 清零计数，保留窗口计时
    async fn reset_attempts(&self, key: &str) -> AppResult<()>;

    /// 剩余可用次数（不会小于 0）
    async fn retries_left(&self, key: &str, max_attempts: u64) -> AppResult<u64>;

    /// 同时清除计数与窗口计时
    async fn clear(&self, key: &str) -> AppResult<()>;

    /// 距离窗口重置还有多少秒，没有窗口时为 0
    async fn available_in(&self, key: &str) -> AppResult<u64>;
}
