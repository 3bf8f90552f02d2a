//! Token 存储后端抽象接口
//!
//! 服务层只依赖此 trait，便于在测试中注入替代实现

use crate::error::TokenResult;
use crate::types::{TokenRecord, TokenUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Token 存储后端抽象接口
///
/// 实现必须保证写入串行化：同一时刻最多一个写操作在进行
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 应用全部未执行的 schema 迁移，可重复调用
    async fn migrate(&self) -> TokenResult<()>;

    /// 存活检查
    async fn ping(&self) -> TokenResult<()>;

    /// 插入新记录
    ///
    /// # Errors
    /// * `DuplicateKey` - id 已存在
    /// * `Persistence` - 其他写入失败
    async fn create(&self, record: &TokenRecord) -> TokenResult<()>;

    /// 按 `updated_at` 升序列出全部记录，不含凭证本身
    ///
    /// 任一行时间戳无法解析时整个读取失败
    async fn list(&self) -> TokenResult<Vec<TokenRecord>>;

    /// 根据 id 查询记录
    ///
    /// # Returns
    /// * `Ok(Some(record))` - 找到记录
    /// * `Ok(None)` - 记录不存在
    async fn get(&self, id: &str) -> TokenResult<Option<TokenRecord>>;

    /// 吊销 token
    ///
    /// 只有 false→true 的转换会刷新 `updated_at`，重复吊销不修改记录。
    /// 记录不存在时返回 `Ok(None)`。
    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> TokenResult<Option<TokenRecord>>;

    /// 删除记录及其使用历史，返回是否删除了记录
    async fn delete(&self, id: &str) -> TokenResult<bool>;

    /// 写入使用记录并更新 `last_used_at`（同一事务）
    async fn record_usage(&self, usage: &TokenUsage) -> TokenResult<()>;

    /// 按时间顺序列出某 token 的使用记录
    async fn list_usages(&self, id: &str) -> TokenResult<Vec<TokenUsage>>;

    /// 关闭存储，可重复调用
    async fn close(&self);
}
