//! throttle-config - 配置加载库

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志（生产环境）
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 限流存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    /// 进程内存储（单实例）
    #[default]
    Memory,
    /// Redis 存储（多实例共享）
    Redis,
}

/// 单条路由的限流覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct RouteThrottleConfig {
    /// 路径前缀，例如 `/api/echo`
    pub prefix: String,
    pub max_attempts: u64,
    #[serde(default = "default_decay_seconds")]
    pub decay_seconds: u64,
}

/// 窗口长度上限（秒），一年
pub const MAX_DECAY_SECONDS: u64 = 365 * 24 * 60 * 60;

/// 限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub backend: LimiterBackend,
    /// Redis 键前缀
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// 窗口内允许的最大请求数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    /// 窗口长度（秒）
    #[serde(default = "default_decay_seconds")]
    pub decay_seconds: u64,
    /// 内存后端清理过期窗口的间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub routes: Vec<RouteThrottleConfig>,
}

fn default_key_prefix() -> String {
    "throttle".to_string()
}

fn default_max_attempts() -> u64 {
    60
}

fn default_decay_seconds() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            backend: LimiterBackend::default(),
            key_prefix: default_key_prefix(),
            max_attempts: default_max_attempts(),
            decay_seconds: default_decay_seconds(),
            sweep_interval_secs: default_sweep_interval_secs(),
            routes: Vec::new(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_app_name() -> String {
    "throttle-gateway".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 优先级：`THROTTLE_*` 环境变量 > `{APP_ENV}.toml` > `default.toml`
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_dir))
    }

    /// 构建配置源
    pub fn figment(config_dir: &str) -> Figment {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("THROTTLE_").split("__"))
    }

    /// 从指定配置源提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验限流参数与后端依赖
    pub fn validate(&self) -> Result<(), ConfigError> {
        let throttle = &self.throttle;

        if throttle.max_attempts == 0 || throttle.decay_seconds == 0 {
            return Err(ConfigError::Invalid(
                "throttle.max_attempts and throttle.decay_seconds must be positive".to_string(),
            ));
        }

        if throttle.decay_seconds > MAX_DECAY_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "throttle.decay_seconds must not exceed {}",
                MAX_DECAY_SECONDS
            )));
        }

        if throttle.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "throttle.sweep_interval_secs must be positive".to_string(),
            ));
        }

        for route in &throttle.routes {
            if !route.prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "throttle route prefix must start with '/': {}",
                    route.prefix
                )));
            }
            if route.max_attempts == 0 || route.decay_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "throttle route {} must have positive max_attempts and decay_seconds",
                    route.prefix
                )));
            }
            if route.decay_seconds > MAX_DECAY_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "throttle route {} decay_seconds must not exceed {}",
                    route.prefix, MAX_DECAY_SECONDS
                )));
            }
        }

        if throttle.backend == LimiterBackend::Redis && self.redis.is_none() {
            return Err(ConfigError::Invalid(
                "throttle.backend = \"redis\" requires a [redis] section".to_string(),
            ));
        }

        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}
