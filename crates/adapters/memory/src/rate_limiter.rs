//! 进程内固定窗口限流器
//!
//! 以 `key -> {hits, reset_at}` 保存每个签名的窗口，适合单实例部署

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use throttle_errors::{AppError, AppResult};
use throttle_ports::{Clock, RateLimiter};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::SystemClock;

/// 单个签名的窗口状态
#[derive(Debug, Clone, Copy)]
struct Window {
    hits: u64,
    reset_at: Instant,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// 内存限流器
pub struct InMemoryRateLimiter<C = SystemClock> {
    windows: Mutex<HashMap<String, Window>>,
    clock: C,
}

impl InMemoryRateLimiter<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for InMemoryRateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryRateLimiter<C> {
    /// 使用指定时钟创建限流器
    pub fn with_clock(clock: C) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 读取 `now` 时刻未过期的窗口，过期的顺便移除
    fn live_window(&self, key: &str, now: Instant) -> Option<Window> {
        let mut windows = self.windows.lock();

        match windows.get(key) {
            Some(window) if window.is_expired(now) => {
                windows.remove(key);
                None
            }
            Some(window) => Some(*window),
            None => None,
        }
    }

    /// 清理所有已过期的窗口，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        let purged = before - windows.len();

        metrics::gauge!("rate_limiter_tracked_keys").set(windows.len() as f64);
        if purged > 0 {
            debug!(purged, remaining = windows.len(), "Purged expired rate limit windows");
        }

        purged
    }

    /// 当前跟踪的签名数量（包括尚未清理的过期窗口）
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

impl<C: Clock + 'static> InMemoryRateLimiter<C> {
    /// 启动后台清理任务
    ///
    /// 必须在 tokio 运行时内调用
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                limiter.purge_expired();
            }
        })
    }
}

#[async_trait]
impl<C: Clock> RateLimiter for InMemoryRateLimiter<C> {
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> AppResult<bool> {
        Ok(self.attempts(key).await? >= max_attempts)
    }

    async fn hit(&self, key: &str, decay_seconds: u64) -> AppResult<u64> {
        let now = self.clock.now();
        let reset_at = now
            .checked_add(Duration::from_secs(decay_seconds))
            .ok_or_else(|| {
                AppError::validation(format!("decay_seconds out of range: {}", decay_seconds))
            })?;
        let mut windows = self.windows.lock();

        let window = windows
            .entry(key.to_string())
            .and_modify(|window| {
                if window.is_expired(now) {
                    *window = Window { hits: 0, reset_at };
                }
            })
            .or_insert(Window { hits: 0, reset_at });

        window.hits += 1;
        let hits = window.hits;
        drop(windows);

        metrics::counter!("rate_limiter_hits_total", "backend" => "memory").increment(1);
        debug!(key, hits, decay_seconds, "Recorded rate limit hit");

        Ok(hits)
    }

    async fn attempts(&self, key: &str) -> AppResult<u64> {
        let now = self.clock.now();
        Ok(self.live_window(key, now).map_or(0, |window| window.hits))
    }

    async fn reset_attempts(&self, key: &str) -> AppResult<()> {
        if let Some(window) = self.windows.lock().get_mut(key) {
            window.hits = 0;
        }
        Ok(())
    }

    async fn retries_left(&self, key: &str, max_attempts: u64) -> AppResult<u64> {
        Ok(max_attempts.saturating_sub(self.attempts(key).await?))
    }

    async fn clear(&self, key: &str) -> AppResult<()> {
        self.windows.lock().remove(key);
        Ok(())
    }

    async fn available_in(&self, key: &str) -> AppResult<u64> {
        let now = self.clock.now();
        let Some(window) = self.live_window(key, now) else {
            return Ok(0);
        };

        // 不足一秒按一秒计算，窗口未结束前不会返回 0
        let remaining = window.reset_at.saturating_duration_since(now);
        Ok(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0))
    }
}
