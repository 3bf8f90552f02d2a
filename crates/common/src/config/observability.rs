//! 可观测性配置（日志）

use serde::{Deserialize, Serialize};

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// EnvFilter 指令，如 "info,sqlx=warn"；`RUST_LOG` 优先
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志输出配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// "console"（默认）或 "file"
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 写文件时按天切分 `tokend.log`；关闭时持续追加
    #[serde(default)]
    pub rotate: bool,

    /// 日志目录，仅 output = "file" 时使用
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}
