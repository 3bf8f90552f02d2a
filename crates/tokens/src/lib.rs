//! Token 生命周期服务
//!
//! 提供以下功能：
//! 1. 签发短期 HS256 JWT 凭证，并持久化 token 记录
//! 2. 列举、查询、吊销、删除 token
//! 3. 校验凭证并记录使用历史
//! 4. SQLite 单写者存储与版本化 schema 迁移

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod service;
pub mod signer;
pub mod storage;
pub mod types;

pub use error::{TokenError, TokenResult};
pub use handlers::{TokenState, create_router, token_routes, with_middleware};
pub use metrics::register_metrics;
pub use service::{DEFAULT_TTL_SECS, TokenService};
pub use signer::{Claims, TokenSigner};
pub use storage::{SqliteTokenStore, StoreOptions, TokenStore};
pub use types::{ClientInfo, TokenRecord, TokenUsage, UsageOutcome};

use std::sync::Arc;

/// 打开存储、执行迁移并创建 HTTP 状态
///
/// 任一步骤失败时已打开的存储会被关闭
pub async fn create_token_state(
    database_uri: &str,
    options: StoreOptions,
    secret: &[u8],
    default_ttl_secs: u64,
) -> TokenResult<(TokenState, Arc<SqliteTokenStore>)> {
    let store = Arc::new(SqliteTokenStore::open(database_uri, options).await?);

    if let Err(e) = store.migrate().await {
        store.close().await;
        return Err(e);
    }

    let service = TokenService::new(store.clone(), TokenSigner::new(secret))
        .with_default_ttl(default_ttl_secs);

    Ok((TokenState::new(service), store))
}
