//! 版本化 schema 迁移
//!
//! 已执行的版本记录在 `schema_migrations` 表中，每个版本在独立事务内执行。

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{TokenError, TokenResult};

/// 单个迁移版本
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// 按版本升序排列的全部迁移
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create tokens table",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS tokens (
                id TEXT PRIMARY KEY,
                is_revoked INTEGER NOT NULL DEFAULT 0,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#],
    },
    Migration {
        version: 2,
        description: "add audit columns to tokens",
        statements: &[
            "ALTER TABLE tokens ADD COLUMN token TEXT",
            "ALTER TABLE tokens ADD COLUMN client_ip TEXT",
            "ALTER TABLE tokens ADD COLUMN user_agent TEXT",
            "ALTER TABLE tokens ADD COLUMN last_used_at TEXT",
        ],
    },
    Migration {
        version: 3,
        description: "create token_usages table",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS token_usages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_id TEXT NOT NULL REFERENCES tokens(id) ON DELETE CASCADE,
                used_at TEXT NOT NULL,
                client_ip TEXT,
                user_agent TEXT,
                outcome TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_token_usages_token_id ON token_usages(token_id)",
        ],
    },
];

/// 最新 schema 版本
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// 查询当前 schema 版本（未迁移时为 0）
pub async fn current_version(pool: &SqlitePool) -> TokenResult<u32> {
    ensure_migrations_table(pool).await?;

    let (version,) =
        sqlx::query_as::<_, (i64,)>("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await
            .map_err(|e| TokenError::Migration {
                version: 0,
                message: format!("Failed to read schema version: {e}"),
            })?;

    Ok(version as u32)
}

async fn ensure_migrations_table(pool: &SqlitePool) -> TokenResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| TokenError::Migration {
        version: 0,
        message: format!("Failed to create schema_migrations table: {e}"),
    })?;
    Ok(())
}

/// 执行全部未应用的迁移
pub async fn run(pool: &SqlitePool) -> TokenResult<()> {
    let current = current_version(pool).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(pool, migration).await?;
        info!(
            "Applied migration v{}: {}",
            migration.version, migration.description
        );
    }

    debug!("Schema at version {}", latest_version());
    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> TokenResult<()> {
    let fail = |e: sqlx::Error| TokenError::Migration {
        version: migration.version,
        message: e.to_string(),
    };

    let mut tx = pool.begin().await.map_err(fail)?;

    for statement in migration.statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
    }

    sqlx::query(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
    )
    .bind(migration.version as i64)
    .bind(migration.description)
    .bind(Utc::now().timestamp().to_string())
    .execute(&mut *tx)
    .await
    .map_err(fail)?;

    tx.commit().await.map_err(fail)?;
    Ok(())
}
