//! SQLite 存储后端实现
//!
//! 使用 sqlx 提供原生异步 SQLite 存储支持。连接池只有一个连接，
//! 所有读写在该连接上串行执行。

use crate::error::{TokenError, TokenResult};
use crate::storage::backend::TokenStore;
use crate::storage::migrations;
use crate::types::{TokenRecord, TokenUsage, UsageOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const TOKEN_COLUMNS: &str =
    "id, is_revoked, issued_at, expires_at, updated_at, client_ip, user_agent, last_used_at";

/// 存储打开选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 写锁等待时间
    pub busy_timeout: Duration,
    /// 建立连接的超时
    pub connect_timeout: Duration,
    /// 单次存储操作（含 ping 与迁移）的超时
    pub operation_timeout: Duration,
    /// 连接最长存活时间，`None` 表示不限制
    pub max_lifetime: Option<Duration>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
            max_lifetime: Some(Duration::from_secs(3600)),
        }
    }
}

/// SQLite 存储后端
#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
    uri: String,
    options: StoreOptions,
}

impl std::fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenStore")
            .field("uri", &self.uri)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl SqliteTokenStore {
    /// 打开（不存在时创建）单文件数据库
    ///
    /// `uri` 可以是 `sqlite:` URL，也可以是普通文件路径
    pub async fn open(uri: &str, options: StoreOptions) -> TokenResult<Self> {
        let connect_options = if uri.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(uri)
                .map_err(|e| TokenError::Connection(format!("Invalid SQLite URI {uri}: {e}")))?
        } else {
            SqliteConnectOptions::new().filename(uri)
        }
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(options.connect_timeout)
            .max_lifetime(options.max_lifetime);

        let pool = match tokio::time::timeout(
            options.connect_timeout,
            pool_options.connect_with(connect_options),
        )
        .await
        {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(TokenError::Connection(format!(
                    "Failed to open SQLite database {uri}: {e}"
                )));
            }
            Err(_) => {
                return Err(TokenError::Connection(format!(
                    "Opening SQLite database {uri} timed out after {:?}",
                    options.connect_timeout
                )));
            }
        };

        let store = Self {
            pool,
            uri: uri.to_string(),
            options,
        };

        // 初始化未完成时不保留连接
        if let Err(e) = store.ping().await {
            store.pool.close().await;
            return Err(e);
        }

        info!(
            "SQLite token store opened: uri={}, WAL mode, single connection",
            store.uri
        );

        Ok(store)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 当前 schema 版本
    pub async fn schema_version(&self) -> TokenResult<u32> {
        self.bounded("schema_version", migrations::current_version(&self.pool))
            .await
    }

    /// 为存储操作加上超时，超时视为连接类错误
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> TokenResult<T>
    where
        F: Future<Output = TokenResult<T>>,
    {
        match tokio::time::timeout(self.options.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "SQLite {} timed out after {:?}",
                    operation, self.options.operation_timeout
                );
                Err(TokenError::Connection(format!(
                    "{operation} timed out after {:?}",
                    self.options.operation_timeout
                )))
            }
        }
    }
}

fn parse_timestamp(column: &str, raw: &str) -> TokenResult<DateTime<Utc>> {
    let secs = raw.parse::<i64>().map_err(|e| {
        TokenError::Persistence(format!("Malformed {column} value {raw:?}: {e}"))
    })?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        TokenError::Persistence(format!("Out of range {column} value {raw:?}"))
    })
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.timestamp().to_string()
}

fn read_err(e: sqlx::Error) -> TokenError {
    TokenError::Persistence(format!("Failed to read token row: {e}"))
}

fn row_to_record(row: &SqliteRow) -> TokenResult<TokenRecord> {
    let issued_at: String = row.try_get("issued_at").map_err(read_err)?;
    let expires_at: String = row.try_get("expires_at").map_err(read_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(read_err)?;
    let last_used_at: Option<String> = row.try_get("last_used_at").map_err(read_err)?;
    let is_revoked: i64 = row.try_get("is_revoked").map_err(read_err)?;

    Ok(TokenRecord {
        id: row.try_get("id").map_err(read_err)?,
        is_revoked: is_revoked != 0,
        issued_at: parse_timestamp("issued_at", &issued_at)?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        token: None,
        client_ip: row.try_get("client_ip").map_err(read_err)?,
        user_agent: row.try_get("user_agent").map_err(read_err)?,
        last_used_at: last_used_at
            .as_deref()
            .map(|raw| parse_timestamp("last_used_at", raw))
            .transpose()?,
    })
}

fn row_to_usage(row: &SqliteRow) -> TokenResult<TokenUsage> {
    let used_at: String = row.try_get("used_at").map_err(read_err)?;
    let outcome: String = row.try_get("outcome").map_err(read_err)?;

    Ok(TokenUsage {
        id: row.try_get("id").map_err(read_err)?,
        token_id: row.try_get("token_id").map_err(read_err)?,
        used_at: parse_timestamp("used_at", &used_at)?,
        client_ip: row.try_get("client_ip").map_err(read_err)?,
        user_agent: row.try_get("user_agent").map_err(read_err)?,
        outcome: outcome.parse::<UsageOutcome>()?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        // 1555 = SQLITE_CONSTRAINT_PRIMARYKEY, 2067 = SQLITE_CONSTRAINT_UNIQUE
        sqlx::Error::Database(db) => {
            db.is_unique_violation() || matches!(db.code().as_deref(), Some("1555" | "2067"))
        }
        _ => false,
    }
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.is_foreign_key_violation() || db.code().as_deref() == Some("787")
        }
        _ => false,
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn migrate(&self) -> TokenResult<()> {
        match tokio::time::timeout(self.options.operation_timeout, migrations::run(&self.pool))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TokenError::Migration {
                version: migrations::latest_version(),
                message: format!(
                    "timed out after {:?}",
                    self.options.operation_timeout
                ),
            }),
        }
    }

    async fn ping(&self) -> TokenResult<()> {
        self.bounded("ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| TokenError::Connection(format!("SQLite ping failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn create(&self, record: &TokenRecord) -> TokenResult<()> {
        self.bounded("create", async {
            sqlx::query(
                r#"INSERT INTO tokens
                   (id, is_revoked, issued_at, expires_at, updated_at, token, client_ip, user_agent, last_used_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            )
            .bind(&record.id)
            .bind(record.is_revoked as i64)
            .bind(format_timestamp(record.issued_at))
            .bind(format_timestamp(record.expires_at))
            .bind(format_timestamp(record.updated_at))
            .bind(record.token.as_deref())
            .bind(record.client_ip.as_deref())
            .bind(record.user_agent.as_deref())
            .bind(record.last_used_at.map(format_timestamp))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TokenError::DuplicateKey(record.id.clone())
                } else {
                    TokenError::Persistence(format!("Failed to insert token {}: {e}", record.id))
                }
            })?;

            debug!("Inserted token: id={}", record.id);
            Ok(())
        })
        .await
    }

    async fn list(&self) -> TokenResult<Vec<TokenRecord>> {
        self.bounded("list", async {
            let rows = sqlx::query(&format!(
                "SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY CAST(updated_at AS INTEGER), rowid"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TokenError::Persistence(format!("Failed to list tokens: {e}")))?;

            rows.iter().map(row_to_record).collect()
        })
        .await
    }

    async fn get(&self, id: &str) -> TokenResult<Option<TokenRecord>> {
        self.bounded("get", async {
            let row = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TokenError::Persistence(format!("Failed to query token {id}: {e}")))?;

            row.as_ref().map(row_to_record).transpose()
        })
        .await
    }

    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> TokenResult<Option<TokenRecord>> {
        self.bounded("revoke", async {
            let fail = |e: sqlx::Error| {
                TokenError::Persistence(format!("Failed to revoke token {id}: {e}"))
            };

            let mut tx = self.pool.begin().await.map_err(fail)?;

            let result = sqlx::query(
                "UPDATE tokens SET is_revoked = 1, updated_at = ?2 WHERE id = ?1 AND is_revoked = 0",
            )
            .bind(id)
            .bind(format_timestamp(at))
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

            let row = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(fail)?;

            tx.commit().await.map_err(fail)?;

            if result.rows_affected() > 0 {
                debug!("Revoked token: id={}", id);
            }

            row.as_ref().map(row_to_record).transpose()
        })
        .await
    }

    async fn delete(&self, id: &str) -> TokenResult<bool> {
        self.bounded("delete", async {
            let result = sqlx::query("DELETE FROM tokens WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| TokenError::Persistence(format!("Failed to delete token {id}: {e}")))?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn record_usage(&self, usage: &TokenUsage) -> TokenResult<()> {
        self.bounded("record_usage", async {
            let fail = |e: sqlx::Error| {
                if is_foreign_key_violation(&e) {
                    TokenError::NotFound(usage.token_id.clone())
                } else {
                    TokenError::Persistence(format!(
                        "Failed to record usage of token {}: {e}",
                        usage.token_id
                    ))
                }
            };

            let mut tx = self.pool.begin().await.map_err(fail)?;

            sqlx::query(
                r#"INSERT INTO token_usages (token_id, used_at, client_ip, user_agent, outcome)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
            )
            .bind(&usage.token_id)
            .bind(format_timestamp(usage.used_at))
            .bind(usage.client_ip.as_deref())
            .bind(usage.user_agent.as_deref())
            .bind(usage.outcome.as_str())
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

            if usage.outcome == UsageOutcome::Accepted {
                sqlx::query("UPDATE tokens SET last_used_at = ?2 WHERE id = ?1")
                    .bind(&usage.token_id)
                    .bind(format_timestamp(usage.used_at))
                    .execute(&mut *tx)
                    .await
                    .map_err(fail)?;
            }

            tx.commit().await.map_err(fail)?;
            Ok(())
        })
        .await
    }

    async fn list_usages(&self, id: &str) -> TokenResult<Vec<TokenUsage>> {
        self.bounded("list_usages", async {
            let rows = sqlx::query(
                r#"SELECT id, token_id, used_at, client_ip, user_agent, outcome
                   FROM token_usages WHERE token_id = ?1
                   ORDER BY CAST(used_at AS INTEGER), id"#,
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                TokenError::Persistence(format!("Failed to list usages of token {id}: {e}"))
            })?;

            rows.iter().map(row_to_usage).collect()
        })
        .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("SQLite token store closed: uri={}", self.uri);
        }
    }
}
