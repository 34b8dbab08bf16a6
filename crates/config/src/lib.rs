//! 统一配置中心
//!
//! 提供估点服务的全局配置管理，包括：
//! - 监听地址
//! - 连接存活与心跳参数
//! - 会话清理参数
//! - 日志级别
//!
//! 加载顺序：默认值 → 配置文件（`POKER_CONFIG_FILE`）→ 兼容旧部署的扁平环境变量
//! （`PORT`、`HEARTBEAT_INTERVAL` 等）→ `POKER_` 前缀的嵌套环境变量（`POKER_SERVER__PORT`）。
//! 所有时长均以毫秒为单位。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::value::Uncased;
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "POKER_CONFIG_FILE";

/// 旧部署使用的扁平环境变量到配置路径的映射
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("WS_CONNECTION_CHECK_INTERVAL", "presence.connection_check_interval_ms"),
    ("WS_INACTIVITY_TIMEOUT", "presence.inactivity_timeout_ms"),
    ("HEARTBEAT_INTERVAL", "presence.heartbeat_interval_ms"),
    ("MISSED_HEARTBEAT_THRESHOLD", "presence.missed_heartbeat_threshold"),
    ("OFFLINE_REMOVAL_TIMEOUT", "presence.offline_removal_timeout_ms"),
    ("SESSION_CLEANUP_INTERVAL", "session.cleanup_interval_ms"),
    ("SESSION_INACTIVITY_THRESHOLD", "session.inactivity_threshold_ms"),
    ("LOG_LEVEL", "logging.level"),
];

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub presence: PresenceConfig,
    #[serde(default)]
    #[validate(nested)]
    pub session: SessionConfig,
    #[serde(default)]
    #[validate(nested)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
}

/// 连接存活与心跳配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PresenceConfig {
    /// 存活巡检间隔
    #[validate(range(min = 1))]
    pub connection_check_interval_ms: u64,
    /// 无任何消息多久后断开
    #[validate(range(min = 1))]
    pub inactivity_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,
    #[validate(range(min = 1))]
    pub missed_heartbeat_threshold: u32,
    /// 离线多久后移除
    #[validate(range(min = 1))]
    pub offline_removal_timeout_ms: u64,
}

/// 会话清理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    #[validate(range(min = 1))]
    pub cleanup_interval_ms: u64,
    #[validate(range(min = 1))]
    pub inactivity_threshold_ms: u64,
    /// 新连接建立后多久推送一次完整状态
    pub state_sync_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TimerConfig {
    #[validate(range(min = 1))]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            connection_check_interval_ms: 30_000,
            inactivity_timeout_ms: 3_600_000,
            heartbeat_interval_ms: 15_000,
            missed_heartbeat_threshold: 3,
            offline_removal_timeout_ms: 3_600_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: 3_600_000,
            inactivity_threshold_ms: 86_400_000,
            state_sync_delay_ms: 500,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            presence: PresenceConfig::default(),
            session: SessionConfig::default(),
            timer: TimerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PresenceConfig {
    pub fn connection_check_interval(&self) -> Duration {
        Duration::from_millis(self.connection_check_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn offline_removal_timeout(&self) -> Duration {
        Duration::from_millis(self.offline_removal_timeout_ms)
    }
}

impl SessionConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.inactivity_threshold_ms)
    }

    pub fn state_sync_delay(&self) -> Duration {
        Duration::from_millis(self.state_sync_delay_ms)
    }
}

impl TimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl AppConfig {
    /// 按优先级合并所有配置来源
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::raw().filter_map(|key| {
            LEGACY_ENV
                .iter()
                .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                .map(|(_, path)| Uncased::from(*path))
        }))
        .merge(Env::prefixed("POKER_").split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let cfg: AppConfig = Self::figment().extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 TOML/YAML/JSON 字符串解析，按简单规则识别格式
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let format_error = |err: String| ConfigError::Parse(err);
        let cfg: AppConfig = if s.trim_start().starts_with('{') {
            serde_json::from_str(s).map_err(|e| format_error(e.to_string()))?
        } else if s.contains('[') || s.contains('=') {
            toml::from_str(s).map_err(|e| format_error(e.to_string()))?
        } else {
            serde_yaml::from_str(s).map_err(|e| format_error(e.to_string()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    ///
    /// 端口非法直接报错；可疑但能运行的组合只记录警告。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        Validate::validate(self)?;

        if self.presence.connection_check_interval_ms < 1_000 {
            tracing::warn!(
                interval_ms = self.presence.connection_check_interval_ms,
                "connection check interval is below one second"
            );
        }

        if self.session.inactivity_threshold_ms < self.session.cleanup_interval_ms {
            tracing::warn!(
                threshold_ms = self.session.inactivity_threshold_ms,
                cleanup_interval_ms = self.session.cleanup_interval_ms,
                "session inactivity threshold is shorter than the cleanup interval"
            );
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid configuration value: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}
