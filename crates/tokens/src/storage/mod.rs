//! Token 存储模块
//!
//! # 设计
//!
//! - `TokenStore` trait 定义统一的异步接口，服务层通过 `Arc<dyn TokenStore>` 注入
//! - `SqliteTokenStore` 是唯一的持久化实现（单连接，单写者）
//! - `migrations` 管理版本化 schema

pub mod backend;
pub mod migrations;
pub mod sqlite;

pub use backend::TokenStore;
pub use sqlite::{SqliteTokenStore, StoreOptions};
