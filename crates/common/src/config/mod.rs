//! 统一配置管理系统
//!
//! 本模块是 tokend 配置的"单一真理之源"。
//! 所有配置项的定义、默认值、环境变量覆盖与校验都在这里统一管理。
//!
//! 加载顺序：
//! 1. TOML 配置文件（缺省时使用内置默认值）
//! 2. 环境变量覆盖：`DATABASE_URI`、`SERVER_ADDR`、`SERVER_PORT`、`JWT_SECRET`

pub mod bind;
pub mod database;
pub mod observability;
pub mod signing;

pub use crate::config::bind::{BindConfig, HttpBindConfig};
pub use crate::config::database::DatabaseConfig;
pub use crate::config::observability::{LogConfig, ObservabilityConfig};
pub use crate::config::signing::{MAX_DEFAULT_TTL_SECS, SigningConfig};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 环境变量：数据库位置
pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
/// 环境变量：绑定地址
pub const ENV_SERVER_ADDR: &str = "SERVER_ADDR";
/// 环境变量：绑定端口（必须是合法端口号）
pub const ENV_SERVER_PORT: &str = "SERVER_PORT";
/// 环境变量：HS256 签名密钥
pub const ENV_JWT_SECRET: &str = "JWT_SECRET";

/// tokend 主配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokendConfig {
    /// 服务实例名称
    #[serde(default = "default_name")]
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境，允许使用内置默认密钥（仅警告）
    /// - "prod": 生产环境，拒绝内置默认密钥
    /// - "test": 测试环境
    #[serde(default = "default_env")]
    pub env: String,

    /// 网络绑定配置
    #[serde(default)]
    pub bind: BindConfig,

    /// SQLite 存储配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token 签名配置
    #[serde(default)]
    pub signing: SigningConfig,

    /// 优雅关闭等待时间（秒）
    ///
    /// 收到关闭信号后，停止接受新连接，并在该时间内等待进行中的请求完成，
    /// 之后才关闭数据库。
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// 可观测性配置
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_name() -> String {
    "tokend-default".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for TokendConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            env: default_env(),
            bind: BindConfig::default(),
            database: DatabaseConfig::default(),
            signing: SigningConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl TokendConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }

        if !path_ref.is_file() {
            return Err(ConfigError::NotAFile {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// 使用进程环境变量覆盖配置
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// 使用给定的查找函数覆盖配置
    ///
    /// 空字符串视为未设置。`SERVER_PORT` 无法解析为端口号时返回错误，
    /// 调用方应将其视为致命的启动错误。
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get(ENV_DATABASE_URI) {
            self.database.uri = uri;
        }

        if let Some(addr) = get(ENV_SERVER_ADDR) {
            self.bind.http.ip = addr;
        }

        if let Some(port) = get(ENV_SERVER_PORT) {
            self.bind.http.port = port.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_SERVER_PORT.to_string(),
                value: port.clone(),
            })?;
        }

        if let Some(secret) = get(ENV_JWT_SECRET) {
            self.signing.jwt_secret = secret;
        }

        Ok(())
    }

    /// 检查是否使用控制台日志输出
    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    /// 返回可观测性配置引用
    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// 验证配置有效性
    ///
    /// 返回发现的全部问题；以 `Warning:` 开头的条目不阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        {
            let main_level = self
                .observability
                .filter_level
                .split(',')
                .next()
                .unwrap_or("")
                .trim();
            if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
                errors.push(format!(
                    "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                    self.observability.filter_level
                ));
            }
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        if self.bind.http.ip.trim().is_empty() {
            errors.push("bind.http.ip cannot be empty".to_string());
        }

        if self.database.uri.trim().is_empty() {
            errors.push("database.uri cannot be empty".to_string());
        }

        if self.database.operation_timeout_secs == 0 {
            errors.push("database.operation_timeout_secs must be greater than 0".to_string());
        }

        if self.signing.jwt_secret.is_empty() {
            errors.push("signing.jwt_secret cannot be empty".to_string());
        } else if self.signing.uses_default_secret() {
            if self.env == "prod" {
                errors.push(
                    "signing.jwt_secret is the built-in default; set JWT_SECRET for production"
                        .to_string(),
                );
            } else {
                errors.push(
                    "Warning: signing.jwt_secret is the built-in insecure default".to_string(),
                );
            }
        } else if self.signing.jwt_secret.len() < 32 {
            errors.push(
                "Warning: signing.jwt_secret is shorter than 32 bytes, HS256 recommends at least 256 bits"
                    .to_string(),
            );
        }

        if self.signing.default_ttl_secs > MAX_DEFAULT_TTL_SECS {
            errors.push(format!(
                "signing.default_ttl_secs {} exceeds the maximum of {} seconds",
                self.signing.default_ttl_secs, MAX_DEFAULT_TTL_SECS
            ));
        }

        if self.env == "prod" && self.is_console_logging() {
            errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
