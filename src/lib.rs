//! # tokend
//!
//! 短期 JWT Token 签发、存储与校验服务

pub mod server;

// Re-export commonly used types
pub use server::{HttpServer, RunningServer};
pub use tokend_common::config::TokendConfig;
