//! Token 服务错误定义

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Token 服务错误类型
#[derive(Error, Debug)]
pub enum TokenError {
    /// 无法打开或连接存储（包括超时）
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema 迁移失败
    #[error("Migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// 客户端输入不合法
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 无法解析的表单请求体
    #[error("Malformed form body: {0}")]
    MalformedForm(String),

    /// 凭证编码失败
    #[error("Signing error: {0}")]
    Signing(String),

    /// 凭证签名、有效期校验失败或未知的 jti
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token 已被吊销
    #[error("Token revoked: id={0}")]
    Revoked(String),

    /// 主键冲突
    #[error("Duplicate key: id={0}")]
    DuplicateKey(String),

    /// 读写或解析存储数据失败
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Token 不存在
    #[error("Token not found: id={0}")]
    NotFound(String),
}

impl TokenError {
    /// 错误分类标签，用于日志与指标
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Connection(_) => "connection",
            TokenError::Migration { .. } => "migration",
            TokenError::InvalidArgument(_) => "invalid_argument",
            TokenError::MalformedForm(_) => "malformed_form",
            TokenError::Signing(_) => "signing",
            TokenError::InvalidToken(_) => "invalid_token",
            TokenError::Revoked(_) => "revoked",
            TokenError::DuplicateKey(_) => "duplicate_key",
            TokenError::Persistence(_) => "persistence",
            TokenError::NotFound(_) => "not_found",
        }
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            TokenError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TokenError::MalformedForm(_) => StatusCode::BAD_GATEWAY,
            TokenError::InvalidToken(_) | TokenError::Revoked(_) => StatusCode::UNAUTHORIZED,
            TokenError::NotFound(_) => StatusCode::NOT_FOUND,
            TokenError::Connection(_)
            | TokenError::Migration { .. }
            | TokenError::Signing(_)
            | TokenError::DuplicateKey(_)
            | TokenError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            // 客户端可据此修正请求
            TokenError::InvalidArgument(message) => message.clone(),
            TokenError::MalformedForm(_) => "Failed to parse the form".to_string(),
            TokenError::InvalidToken(_) => "Invalid token".to_string(),
            TokenError::Revoked(_) => "Token has been revoked".to_string(),
            TokenError::NotFound(_) => "Token not found".to_string(),
            _ => {
                // 不向客户端暴露内部错误详情
                tracing::error!(kind = self.kind(), "Internal error: {:?}", self);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Token 结果类型别名
pub type TokenResult<T> = Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: TokenError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_internal_errors_are_opaque() {
        let (status, body) =
            body_json(TokenError::Persistence("disk I/O error at page 42".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["code"], 500);

        let (status, body) = body_json(TokenError::Signing("bad key".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn test_client_errors_keep_actionable_message() {
        let (status, body) = body_json(TokenError::InvalidArgument(
            "Invalid expires_sec parameter".into(),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid expires_sec parameter");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TokenError::MalformedForm("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            TokenError::Revoked("id".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TokenError::NotFound("id".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TokenError::DuplicateKey("id".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
