//! 限流策略
//!
//! 默认策略加上按路径前缀的覆盖规则，最长前缀优先

use throttle_config::{MAX_DECAY_SECONDS, ThrottleConfig};
use throttle_errors::{AppError, AppResult};

/// 单个窗口的限流参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    max_attempts: u64,
    decay_seconds: u64,
}

impl ThrottlePolicy {
    /// 两个参数都必须为正数，窗口不超过 `MAX_DECAY_SECONDS`
    pub fn new(max_attempts: u64, decay_seconds: u64) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::validation("max_attempts must be positive"));
        }
        if decay_seconds == 0 {
            return Err(AppError::validation("decay_seconds must be positive"));
        }
        if decay_seconds > MAX_DECAY_SECONDS {
            return Err(AppError::validation(format!(
                "decay_seconds must not exceed {}",
                MAX_DECAY_SECONDS
            )));
        }

        Ok(Self {
            max_attempts,
            decay_seconds,
        })
    }

    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    pub fn decay_seconds(&self) -> u64 {
        self.decay_seconds
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            decay_seconds: 60,
        }
    }
}

/// 策略表
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    default: ThrottlePolicy,
    routes: Vec<(String, ThrottlePolicy)>,
}

impl PolicyTable {
    pub fn new(default: ThrottlePolicy) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// 添加路径前缀覆盖，同一前缀后添加的生效
    pub fn with_route(mut self, prefix: impl Into<String>, policy: ThrottlePolicy) -> Self {
        let prefix = prefix.into();
        self.routes.retain(|(existing, _)| *existing != prefix);
        self.routes.push((prefix, policy));
        self
    }

    /// 从配置构建
    pub fn from_config(config: &ThrottleConfig) -> AppResult<Self> {
        let default = ThrottlePolicy::new(config.max_attempts, config.decay_seconds)?;

        config.routes.iter().try_fold(Self::new(default), |table, route| -> AppResult<Self> {
            let policy = ThrottlePolicy::new(route.max_attempts, route.decay_seconds)?;
            Ok(table.with_route(route.prefix.clone(), policy))
        })
    }

    pub fn default_policy(&self) -> ThrottlePolicy {
        self.default
    }

    /// 查找请求路径适用的策略
    pub fn resolve(&self, path: &str) -> ThrottlePolicy {
        self.routes
            .iter()
            .filter(|(prefix, _)| matches_prefix(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default)
    }
}

/// 按路径段匹配：`/api/echo` 匹配 `/api/echo/1`，不匹配 `/api/echoes`
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use throttle_config::RouteThrottleConfig;

    #[test]
    fn test_default_policy() {
        let policy = ThrottlePolicy::default();
        assert_eq!(policy.max_attempts(), 60);
        assert_eq!(policy.decay_seconds(), 60);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(matches!(
            ThrottlePolicy::new(0, 60),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ThrottlePolicy::new(60, 0),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_decay_rejected() {
        assert!(matches!(
            ThrottlePolicy::new(60, u64::MAX),
            Err(AppError::Validation(_))
        ));
        assert!(ThrottlePolicy::new(60, MAX_DECAY_SECONDS + 1).is_err());
        assert_eq!(
            ThrottlePolicy::new(60, MAX_DECAY_SECONDS).unwrap().decay_seconds(),
            MAX_DECAY_SECONDS
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = PolicyTable::default()
            .with_route("/api", ThrottlePolicy::new(30, 60).unwrap())
            .with_route("/api/echo", ThrottlePolicy::new(5, 10).unwrap());

        assert_eq!(table.resolve("/api/echo").max_attempts(), 5);
        assert_eq!(table.resolve("/api/echo/nested").max_attempts(), 5);
        assert_eq!(table.resolve("/api/ping").max_attempts(), 30);
        assert_eq!(table.resolve("/health").max_attempts(), 60);
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let table = PolicyTable::default().with_route("/api/echo", ThrottlePolicy::new(5, 10).unwrap());
        assert_eq!(table.resolve("/api/echoes").max_attempts(), 60);

        let table = PolicyTable::default().with_route("/api/", ThrottlePolicy::new(7, 10).unwrap());
        assert_eq!(table.resolve("/api/anything").max_attempts(), 7);
    }

    #[test]
    fn test_later_route_replaces_same_prefix() {
        let table = PolicyTable::default()
            .with_route("/api", ThrottlePolicy::new(30, 60).unwrap())
            .with_route("/api", ThrottlePolicy::new(10, 60).unwrap());
        assert_eq!(table.resolve("/api/ping").max_attempts(), 10);
    }

    #[test]
    fn test_from_config() {
        let config = ThrottleConfig {
            max_attempts: 100,
            decay_seconds: 30,
            routes: vec![RouteThrottleConfig {
                prefix: "/api/echo".to_string(),
                max_attempts: 2,
                decay_seconds: 60,
            }],
            ..ThrottleConfig::default()
        };

        let table = PolicyTable::from_config(&config).unwrap();
        assert_eq!(table.default_policy(), ThrottlePolicy::new(100, 30).unwrap());
        assert_eq!(table.resolve("/api/echo"), ThrottlePolicy::new(2, 60).unwrap());
    }

    #[test]
    fn test_from_config_rejects_zero_route() {
        let config = ThrottleConfig {
            routes: vec![RouteThrottleConfig {
                prefix: "/api".to_string(),
                max_attempts: 0,
                decay_seconds: 60,
            }],
            ..ThrottleConfig::default()
        };
        assert!(PolicyTable::from_config(&config).is_err());
    }
}
