//! SQLite 存储配置

use serde::{Deserialize, Serialize};

/// 默认数据库文件
pub const DEFAULT_DATABASE_URI: &str = "tokend.sqlite";

/// 数据库配置
///
/// tokend 使用单文件 SQLite 数据库，连接池固定为 1 个连接（单写者）。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// 数据库位置
    ///
    /// 支持文件路径（`tokend.sqlite`）或 sqlx URL（`sqlite:/var/lib/tokend/tokens.db`）。
    /// 可被环境变量 `DATABASE_URI` 覆盖。
    #[serde(default = "default_uri")]
    pub uri: String,

    /// 连接最大存活时间（秒），0 表示不限制
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// 单次存储操作超时（秒）
    ///
    /// 包括 ping、迁移以及请求路径上的读写。
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_uri() -> String {
    DEFAULT_DATABASE_URI.to_string()
}

fn default_max_lifetime_secs() -> u64 {
    3600
}

fn default_operation_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            max_lifetime_secs: default_max_lifetime_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}
