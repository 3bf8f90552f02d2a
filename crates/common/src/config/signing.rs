//! Token 签名配置

use serde::{Deserialize, Serialize};

/// 内置默认签名密钥
///
/// 仅用于本地实验。配置校验会对其发出警告。
pub const DEFAULT_JWT_SECRET: &str = "00000000-0000-0000-1000-000000000000";

/// 默认 Token 有效期（秒）
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

/// 默认有效期上限（秒），约 100 年
pub const MAX_DEFAULT_TTL_SECS: u64 = 100 * 365 * 86_400;

/// 签名配置
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    /// HS256 共享密钥
    ///
    /// 可被环境变量 `JWT_SECRET` 覆盖；未设置时回退到 [`DEFAULT_JWT_SECRET`]。
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// 请求未指定 `expires_sec` 时使用的有效期（秒）
    #[serde(default = "default_token_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_jwt_secret() -> String {
    DEFAULT_JWT_SECRET.to_string()
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            default_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl SigningConfig {
    /// 是否仍在使用内置默认密钥
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("jwt_secret", &"<redacted>")
            .field("default_ttl_secs", &self.default_ttl_secs)
            .finish()
    }
}
