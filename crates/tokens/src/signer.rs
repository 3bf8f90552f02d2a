//! HS256 凭证签发与校验
//!
//! 凭证为紧凑 JWT，声明为 `{jti, iat, exp, nbf}`，时间精确到秒。
//! 相同输入产生字节一致的输出。

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{TokenError, TokenResult};

/// JWT 声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

/// 使用共享密钥的 HS256 签名器
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("algorithm", &"HS256")
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// 为 token 签发凭证
    ///
    /// 不检查时间范围，`expires_at` 早于 `issued_at` 也会照常签名。
    pub fn sign(
        &self,
        token_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> TokenResult<String> {
        let claims = Claims {
            jti: token_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            nbf: issued_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(format!("Failed to encode token {token_id}: {e}")))
    }

    /// 校验签名、`exp` 与 `nbf`（零容差），返回声明
    pub fn verify(&self, credential: &str) -> TokenResult<Claims> {
        decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fixed_instant() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn now_secs() -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = TokenSigner::new(b"secret");
        let issued = fixed_instant();
        let expires = issued + Duration::seconds(3600);

        let a = signer.sign("abc", issued, expires).unwrap();
        let b = signer.sign("abc", issued, expires).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.split('.').count(), 3);
    }

    #[test]
    fn test_different_secrets_produce_different_signatures() {
        let issued = fixed_instant();
        let expires = issued + Duration::seconds(60);

        let a = TokenSigner::new(b"one").sign("id", issued, expires).unwrap();
        let b = TokenSigner::new(b"two").sign("id", issued, expires).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sign_accepts_inverted_range() {
        let signer = TokenSigner::new(b"secret");
        let issued = fixed_instant();
        let result = signer.sign("id", issued, issued - Duration::seconds(10));
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_round_trip() {
        let signer = TokenSigner::new(b"secret");
        let issued = now_secs();
        let expires = issued + Duration::seconds(3600);
        let credential = signer.sign("jti-1", issued, expires).unwrap();

        let claims = signer.verify(&credential).unwrap();
        assert_eq!(claims.jti, "jti-1");
        assert_eq!(claims.iat, issued.timestamp());
        assert_eq!(claims.nbf, issued.timestamp());
        assert_eq!(claims.exp, expires.timestamp());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let issued = now_secs();
        let credential = TokenSigner::new(b"secret")
            .sign("id", issued, issued + Duration::seconds(3600))
            .unwrap();

        let err = TokenSigner::new(b"other").verify(&credential).unwrap_err();
        assert!(matches!(err, TokenError::InvalidToken(_)));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let signer = TokenSigner::new(b"secret");
        let issued = now_secs() - Duration::seconds(7200);
        let credential = signer
            .sign("id", issued, issued + Duration::seconds(3600))
            .unwrap();

        assert!(matches!(
            signer.verify(&credential),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_not_yet_valid() {
        let signer = TokenSigner::new(b"secret");
        let issued = now_secs() + Duration::seconds(600);
        let credential = signer
            .sign("id", issued, issued + Duration::seconds(3600))
            .unwrap();

        assert!(signer.verify(&credential).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let signer = TokenSigner::new(b"secret");
        assert!(signer.verify("not-a-jwt").is_err());
        assert!(signer.verify("").is_err());
    }
}
