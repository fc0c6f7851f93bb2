//! 限流器装配
//!
//! 按配置选择内存或 Redis 后端，生命周期与服务进程一致

use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use throttle_adapter_memory::InMemoryRateLimiter;
use throttle_adapter_redis::{RedisRateLimiter, check_connection, create_connection_manager};
use throttle_config::{AppConfig, LimiterBackend};
use throttle_errors::{AppError, AppResult};
use throttle_ports::RateLimiter;
use tokio::task::JoinHandle;
use tracing::info;

/// 共享限流器及其后台任务
pub struct LimiterHandle {
    limiter: Arc<dyn RateLimiter>,
    sweeper: Option<JoinHandle<()>>,
}

impl LimiterHandle {
    pub fn limiter(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// 停止后台清理任务
    pub fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
    }
}

/// 根据配置创建限流器
pub async fn build_limiter(config: &AppConfig) -> AppResult<LimiterHandle> {
    let throttle = &config.throttle;

    match throttle.backend {
        LimiterBackend::Memory => {
            let limiter = Arc::new(InMemoryRateLimiter::new());
            let sweeper =
                limiter.spawn_sweeper(Duration::from_secs(throttle.sweep_interval_secs));

            info!(
                sweep_interval_secs = throttle.sweep_interval_secs,
                "Using in-memory rate limiter"
            );

            Ok(LimiterHandle {
                limiter,
                sweeper: Some(sweeper),
            })
        }
        LimiterBackend::Redis => {
            let redis = config.redis.as_ref().ok_or_else(|| {
                AppError::validation("throttle.backend = \"redis\" requires a [redis] section")
            })?;

            let mut conn = create_connection_manager(redis.url.expose_secret()).await?;
            // 启动时确认 Redis 可用
            check_connection(&mut conn).await?;
            let limiter = RedisRateLimiter::new(conn).with_key_prefix(throttle.key_prefix.clone());

            info!(key_prefix = %throttle.key_prefix, "Using Redis rate limiter");

            Ok(LimiterHandle {
                limiter: Arc::new(limiter),
                sweeper: None,
            })
        }
    }
}
