//! Token 服务
//!
//! 编排签名器与存储：签发、列举、查询、校验、吊销、删除

use crate::{
    error::{TokenError, TokenResult},
    metrics,
    signer::TokenSigner,
    storage::TokenStore,
    types::{ClientInfo, TokenRecord, TokenUsage, UsageOutcome},
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 未指定有效期时使用的默认值（24 小时）
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// 当前时间，截断到秒
fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Token 服务
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    signer: TokenSigner,
    default_ttl_secs: u64,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, signer: TokenSigner) -> Self {
        Self {
            store,
            signer,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_default_ttl(mut self, ttl_secs: u64) -> Self {
        self.default_ttl_secs = ttl_secs;
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// 解析请求的有效期（秒）
    ///
    /// 缺省或空字符串使用默认值；其他必须是非负整数
    fn parse_ttl(&self, requested: Option<&str>) -> TokenResult<u64> {
        match requested {
            None | Some("") => Ok(self.default_ttl_secs),
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                TokenError::InvalidArgument("Invalid expires_sec parameter".to_string())
            }),
        }
    }

    /// 签发新 token
    ///
    /// 只有在记录持久化成功后才返回凭证
    pub async fn issue(
        &self,
        requested_ttl: Option<&str>,
        client: ClientInfo,
    ) -> TokenResult<TokenRecord> {
        let ttl_secs = self.parse_ttl(requested_ttl)?;

        let issued_at = now_secs();
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                TokenError::InvalidArgument("Invalid expires_sec parameter".to_string())
            })?;

        let id = Uuid::new_v4().to_string();
        let credential = self.signer.sign(&id, issued_at, expires_at)?;

        let record = TokenRecord {
            id,
            is_revoked: false,
            issued_at,
            expires_at,
            updated_at: issued_at,
            token: Some(credential),
            client_ip: client.ip,
            user_agent: client.user_agent,
            last_used_at: None,
        };

        self.store.create(&record).await?;
        metrics::TOKENS_ISSUED.inc();

        info!(
            "Issued token: id={}, ttl={}s, client_ip={}",
            record.id,
            ttl_secs,
            record.client_ip.as_deref().unwrap_or("-")
        );

        Ok(record)
    }

    /// 列出全部 token，按 `updated_at` 升序
    pub async fn list_all(&self) -> TokenResult<Vec<TokenRecord>> {
        self.store.list().await
    }

    pub async fn get(&self, id: &str) -> TokenResult<TokenRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TokenError::NotFound(id.to_string()))
    }

    /// 校验凭证并记录使用
    pub async fn validate(&self, credential: &str, client: ClientInfo) -> TokenResult<TokenRecord> {
        let claims = match self.signer.verify(credential) {
            Ok(claims) => claims,
            Err(e) => {
                metrics::VALIDATIONS.with_label_values(&["invalid"]).inc();
                return Err(e);
            }
        };

        let Some(mut record) = self.store.get(&claims.jti).await? else {
            metrics::VALIDATIONS.with_label_values(&["unknown"]).inc();
            return Err(TokenError::InvalidToken(format!(
                "unknown token id {}",
                claims.jti
            )));
        };

        let used_at = now_secs();
        let outcome = if record.is_revoked {
            UsageOutcome::Revoked
        } else {
            UsageOutcome::Accepted
        };

        let usage = TokenUsage {
            id: 0,
            token_id: record.id.clone(),
            used_at,
            client_ip: client.ip,
            user_agent: client.user_agent,
            outcome,
        };

        metrics::VALIDATIONS
            .with_label_values(&[outcome.as_str()])
            .inc();

        if outcome == UsageOutcome::Revoked {
            // 吊销的 token 无论审计是否写入成功都拒绝
            if let Err(e) = self.store.record_usage(&usage).await {
                warn!("Failed to record revoked usage of {}: {}", record.id, e);
            }
            return Err(TokenError::Revoked(record.id));
        }

        self.store.record_usage(&usage).await?;
        record.last_used_at = Some(used_at);

        debug!("Validated token: id={}", record.id);
        Ok(record)
    }

    /// 吊销 token，重复调用返回同一记录
    pub async fn revoke(&self, id: &str) -> TokenResult<TokenRecord> {
        let record = self
            .store
            .revoke(id, now_secs())
            .await?
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;

        info!("Revoked token: id={}", id);
        Ok(record)
    }

    /// 删除 token 及其使用历史
    pub async fn delete(&self, id: &str) -> TokenResult<()> {
        if !self.store.delete(id).await? {
            return Err(TokenError::NotFound(id.to_string()));
        }
        info!("Deleted token: id={}", id);
        Ok(())
    }

    pub async fn usages(&self, id: &str) -> TokenResult<Vec<TokenUsage>> {
        if self.store.get(id).await?.is_none() {
            return Err(TokenError::NotFound(id.to_string()));
        }
        self.store.list_usages(id).await
    }

    /// 存储是否可用
    pub async fn ping(&self) -> TokenResult<()> {
        self.store.ping().await
    }
}
