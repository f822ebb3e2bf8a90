//! 统一配置中心
//!
//! 提供聊天客户端的全局配置管理，包括：
//! - REST API 地址与超时
//! - 实时通道地址与重连退避
//! - 消息校验与身份设置
//!
//! 加载优先级：默认值 -> 可选 YAML 文件（`CHAT_CONFIG_FILE`）-> 环境变量（`CHAT_*`，层级用 `__` 分隔）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHAT_CONFIG_FILE";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHAT_";

/// 全局客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct ClientConfig {
    /// REST API 配置
    #[validate(nested)]
    pub api: ApiConfig,
    /// 实时通道配置
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    /// 聊天行为配置
    #[validate(nested)]
    pub chat: ChatConfig,
    /// 当前身份
    #[validate(nested)]
    pub identity: IdentityConfig,
}

/// REST API 配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    #[validate(url)]
    pub base_url: String,
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
    /// 访问令牌；为空时以匿名身份请求
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".into(),
            request_timeout_secs: 15,
            auth_token: None,
        }
    }
}

/// 实时通道配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    #[validate(url)]
    pub url: String,
    /// 首次重连等待（毫秒）
    #[validate(range(min = 10))]
    pub reconnect_base_ms: u64,
    /// 重连等待上限（毫秒）
    #[validate(range(min = 10))]
    pub reconnect_max_ms: u64,
    /// 出站帧缓冲容量
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".into(),
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            outbound_buffer: 64,
        }
    }
}

/// 聊天行为配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    /// 消息正文最大字符数
    #[validate(range(min = 1, max = 10_000))]
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 1000,
        }
    }
}

/// 客户端代表的一方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityRole {
    #[default]
    User,
    Store,
}

/// 当前身份配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct IdentityConfig {
    /// 当前登录用户ID
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub role: IdentityRole,
}

impl ClientConfig {
    /// 按默认优先级加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_with_file(file.as_deref())
    }

    /// 显式指定配置文件；环境变量仍然覆盖文件中的值
    pub fn load_with_file(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ClientConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: ClientConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(Box::new(err)))?;
        config.validate_all()?;
        Ok(config)
    }

    /// 字段校验加上跨字段约束
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.realtime.reconnect_max_ms < self.realtime.reconnect_base_ms {
            return Err(ConfigError::Inconsistent(format!(
                "realtime.reconnect_max_ms ({}) must not be below reconnect_base_ms ({})",
                self.realtime.reconnect_max_ms, self.realtime.reconnect_base_ms
            )));
        }
        Ok(())
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        if redacted.api.auth_token.is_some() {
            redacted.api.auth_token = Some("[REDACTED]".into());
        }
        format!("{:?}", redacted)
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RealtimeConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}
