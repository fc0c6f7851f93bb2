//! 限流器模块
//!
//! 提供基于 Redis 的分布式固定窗口限流
//!
//! 每个签名对应两个键：
//! - `{prefix}:{key}`: 窗口内的计数
//! - `{prefix}:{key}:timer`: 窗口计时，TTL 即距离重置的秒数

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use throttle_errors::{AppError, AppResult};
use throttle_ports::RateLimiter;
use tracing::debug;

/// Lua 脚本：记录一次命中
///
/// # 参数
/// - KEYS[1]: 计数键
/// - KEYS[2]: 计时键
/// - ARGV[1]: 窗口大小（秒）
///
/// # 返回值
/// 递增后的计数
static HIT_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
if hits == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end

-- 计时键只在窗口开启时写入，后续命中不延长窗口
redis.call('SET', KEYS[2], '1', 'EX', ARGV[1], 'NX')

return hits
"#;

/// Redis 限流器
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    key_prefix: String,
    hit_script: Script,
}

impl RedisRateLimiter {
    /// 创建新的限流器
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key_prefix: "throttle".to_string(),
            hit_script: Script::new(HIT_SCRIPT),
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn counter_key(&self, key: &str) -> String {
        counter_key(&self.key_prefix, key)
    }

    fn timer_key(&self, key: &str) -> String {
        timer_key(&self.key_prefix, key)
    }
}

fn counter_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

fn timer_key(prefix: &str, key: &str) -> String {
    format!("{}:{}:timer", prefix, key)
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn too_many_attempts(&self, key: &str, max_attempts: u64) -> AppResult<bool> {
        if self.attempts(key).await? < max_attempts {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let timer_alive: bool = conn
            .exists(self.timer_key(key))
            .await
            .map_err(|e| AppError::internal(format!("Redis exists failed: {}", e)))?;

        if timer_alive {
            return Ok(true);
        }

        // 计时键已过期但计数残留，视为新窗口
        self.reset_attempts(key).await?;
        Ok(false)
    }

    async fn hit(&self, key: &str, decay_seconds: u64) -> AppResult<u64> {
        let mut conn = self.conn.clone();

        let hits: u64 = self
            .hit_script
            .key(self.counter_key(key))
            .key(self.timer_key(key))
            .arg(decay_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Rate limit hit failed: {}", e)))?;

        metrics::counter!("rate_limiter_hits_total", "backend" => "redis").increment(1);
        debug!(key, hits, decay_seconds, "Recorded rate limit hit");

        Ok(hits)
    }

    async fn attempts(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn
            .get(self.counter_key(key))
            .await
            .map_err(|e| AppError::internal(format!("Failed to get count: {}", e)))?;
        Ok(count.unwrap_or(0))
    }

    async fn reset_attempts(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.counter_key(key))
            .await
            .map_err(|e| AppError::internal(format!("Failed to reset rate limit: {}", e)))?;
        Ok(())
    }

    async fn retries_left(&self, key: &str, max_attempts: u64) -> AppResult<u64> {
        Ok(max_attempts.saturating_sub(self.attempts(key).await?))
    }

    async fn clear(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(vec![self.counter_key(key), self.timer_key(key)])
            .await
            .map_err(|e| AppError::internal(format!("Failed to clear rate limit: {}", e)))?;
        Ok(())
    }

    async fn available_in(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn
            .ttl(self.timer_key(key))
            .await
            .map_err(|e| AppError::internal(format!("Redis ttl failed: {}", e)))?;

        // -2 表示键不存在，-1 表示没有过期时间
        Ok(u64::try_from(ttl).unwrap_or(0))
    }
}
