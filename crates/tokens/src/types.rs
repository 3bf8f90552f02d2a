//! Token 服务数据类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TokenError;

/// 持久化的 Token 记录
///
/// 时间字段均为秒级精度，JSON 中以 RFC 3339 表示；可选字段为空时不输出。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token ID（UUID v4，同时作为凭证的 jti）
    pub id: String,
    /// 是否已吊销，只能从 false 变为 true
    pub is_revoked: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 创建时设置，吊销时刷新
    pub updated_at: DateTime<Utc>,
    /// 签名后的凭证，仅在签发响应中返回
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// 最近一次校验成功的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// 凭证在给定时刻是否处于有效期内
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.issued_at <= now && now < self.expires_at
    }
}

/// 请求来源信息（尽力而为）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// 校验结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageOutcome {
    Accepted,
    Revoked,
}

impl UsageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOutcome::Accepted => "accepted",
            UsageOutcome::Revoked => "revoked",
        }
    }
}

impl fmt::Display for UsageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageOutcome {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(UsageOutcome::Accepted),
            "revoked" => Ok(UsageOutcome::Revoked),
            other => Err(TokenError::Persistence(format!(
                "Unknown usage outcome: {other}"
            ))),
        }
    }
}

/// Token 使用记录（只追加）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// 自增 ID，写入前为 0
    pub id: i64,
    pub token_id: String,
    pub used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub outcome: UsageOutcome,
}

/// 签发请求表单
#[derive(Debug, Default, Deserialize)]
pub struct IssueForm {
    /// 有效期（秒），缺省或为空时使用默认值
    #[serde(default)]
    pub expires_sec: Option<String>,
}

/// 校验请求表单
#[derive(Debug, Default, Deserialize)]
pub struct ValidateForm {
    #[serde(default)]
    pub token: Option<String>,
}

/// 校验成功响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub token: TokenRecord,
}

/// 健康检查响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TokenRecord {
        let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        TokenRecord {
            id: "0b6a3f4e-6a0e-4d69-9d8a-6c2f1f0c1e11".to_string(),
            is_revoked: false,
            issued_at,
            expires_at: DateTime::from_timestamp(1_700_003_600, 0).unwrap(),
            updated_at: issued_at,
            token: None,
            client_ip: None,
            user_agent: None,
            last_used_at: None,
        }
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(sample_record()).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 5);
        assert!(!obj.contains_key("token"));
        assert!(!obj.contains_key("last_used_at"));
        assert_eq!(json["issued_at"], "2023-11-14T22:13:20Z");
        assert_eq!(json["is_revoked"], false);
    }

    #[test]
    fn test_present_fields_are_serialized() {
        let mut record = sample_record();
        record.token = Some("a.b.c".to_string());
        record.client_ip = Some("10.0.0.1".to_string());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["token"], "a.b.c");
        assert_eq!(json["client_ip"], "10.0.0.1");
        assert!(json.get("user_agent").is_none());
    }

    #[test]
    fn test_is_active_at() {
        let mut record = sample_record();
        let inside = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let after = DateTime::from_timestamp(1_700_003_600, 0).unwrap();

        assert!(record.is_active_at(inside));
        assert!(!record.is_active_at(after));

        record.is_revoked = true;
        assert!(!record.is_active_at(inside));
    }

    #[test]
    fn test_usage_outcome_parse() {
        assert_eq!(
            "accepted".parse::<UsageOutcome>().unwrap(),
            UsageOutcome::Accepted
        );
        assert_eq!(UsageOutcome::Revoked.to_string(), "revoked");
        assert!("maybe".parse::<UsageOutcome>().is_err());
    }
}
