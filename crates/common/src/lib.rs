//! tokend 基础设施库
//!
//! 为 tokend 服务提供配置加载与校验、以及通用错误类型

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::TokendConfig;
pub use error::{ConfigError, Result};
