//! 统一错误处理模型
//!
//! 提供主程序 tokend 的顶层错误类型，聚合配置、存储与运行时错误

use thiserror::Error;

/// 主程序的统一错误枚举
#[derive(Debug, Error)]
pub enum Error {
    /// 配置文件或环境变量错误
    #[error("Configuration error: {0}")]
    Config(#[from] tokend_common::ConfigError),

    /// Token 子系统错误（存储打开、迁移等）
    #[error("Token service error: {0}")]
    Token(#[from] tokens::TokenError),

    /// I/O 操作错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 服务启动失败
    #[error("Service startup failed: {message}")]
    ServiceStartup { message: String },

    /// 服务配置验证失败
    #[error("Service configuration validation failed: {message}")]
    ServiceValidation { message: String },

    /// 自定义错误消息
    #[error("Application error: {message}")]
    Custom { message: String },
}

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 创建自定义错误
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// 创建服务启动失败错误
    pub fn service_startup(message: impl Into<String>) -> Self {
        Self::ServiceStartup {
            message: message.into(),
        }
    }

    /// 创建服务配置验证失败错误
    pub fn service_validation(message: impl Into<String>) -> Self {
        Self::ServiceValidation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom { .. }));
    }

    #[test]
    fn test_service_startup_keeps_context_chain() {
        let cause = anyhow::anyhow!("Address already in use")
            .context("Failed to bind to address '127.0.0.1:8080'");
        let err = Error::service_startup(format!("{cause:#}"));
        let message = err.to_string();
        assert!(message.starts_with("Service startup failed"));
        assert!(message.contains("Failed to bind"));
        assert!(message.contains("Address already in use"));
    }

    #[test]
    fn test_token_error_conversion() {
        let err: Error = tokens::TokenError::Connection("unreachable".into()).into();
        assert!(err.to_string().contains("unreachable"));
    }
}
