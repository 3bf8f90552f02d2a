//! Token HTTP 处理器

use crate::{
    error::TokenError,
    metrics,
    middleware::{access_log, handle_panic, http_trace_layer},
    service::TokenService,
    types::{
        ClientInfo, HealthResponse, IssueForm, TokenRecord, TokenUsage, ValidateForm,
        ValidationResponse,
    },
};
use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{
        HeaderMap, StatusCode, Uri,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, warn};

/// HTTP 层共享状态
#[derive(Clone)]
pub struct TokenState {
    pub service: TokenService,
}

impl TokenState {
    pub fn new(service: TokenService) -> Self {
        Self { service }
    }
}

/// 创建 Token 路由
pub fn create_router(state: TokenState) -> Router {
    with_middleware(token_routes().with_state(state))
}

/// 为路由加上 panic 兜底、访问日志与请求追踪
pub fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(access_log))
        .layer(http_trace_layer())
}

/// 未绑定状态的 Token 路由表
pub fn token_routes() -> Router<TokenState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/tokens", get(list_tokens).post(issue_token))
        .route("/tokens/auth", post(issue_token))
        .route("/signup", post(issue_token))
        .route("/tokens/validate", post(validate_token))
        .route("/tokens/{id}", get(get_token).delete(delete_token))
        .route("/tokens/{id}/revoke", post(revoke_token))
        .route("/tokens/{id}/usages", get(list_usages))
}

async fn ping() -> &'static str {
    "pong"
}

async fn health(State(state): State<TokenState>) -> Json<HealthResponse> {
    let (status, database) = match state.service.ping().await {
        Ok(()) => ("healthy", "ok"),
        Err(e) => {
            warn!("Health check: store unavailable: {}", e);
            ("degraded", "unavailable")
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        database: database.to_string(),
    })
}

async fn metrics_handler() -> String {
    metrics::export_metrics()
}

async fn list_tokens(State(state): State<TokenState>) -> Result<Json<Vec<TokenRecord>>, TokenError> {
    let tokens = state.service.list_all().await?;
    Ok(Json(tokens))
}

/// 请求体中的表单字段
///
/// 接受 urlencoded 与 multipart 表单。未声明类型或请求体为空时视为空表单，
/// 其它类型的非空请求体返回 `MalformedForm`
pub struct FormFields<T>(pub T);

impl<S, T> FromRequest<S> for FormFields<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = TokenError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mime = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "" => Ok(Self(T::default())),
            "application/x-www-form-urlencoded" => {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(|e| TokenError::MalformedForm(e.body_text()))?;
                Ok(Self(value))
            }
            "multipart/form-data" => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|e| TokenError::MalformedForm(e.body_text()))?;
                multipart_form(multipart).await.map(Self)
            }
            other => {
                let body = Bytes::from_request(req, state)
                    .await
                    .map_err(|e| TokenError::MalformedForm(e.body_text()))?;
                if body.is_empty() {
                    Ok(Self(T::default()))
                } else {
                    Err(TokenError::MalformedForm(format!(
                        "Unsupported form content type: {other}"
                    )))
                }
            }
        }
    }
}

/// 读取 multipart 表单的文本字段，文件字段忽略，重复字段视为格式错误
async fn multipart_form<T: DeserializeOwned>(mut multipart: Multipart) -> Result<T, TokenError> {
    let mut fields = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TokenError::MalformedForm(e.body_text()))?
    {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| TokenError::MalformedForm(e.body_text()))?;

        if fields.insert(name.clone(), Value::String(value)).is_some() {
            return Err(TokenError::MalformedForm(format!(
                "duplicate field `{name}`"
            )));
        }
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| TokenError::MalformedForm(e.to_string()))
}

async fn issue_token(
    State(state): State<TokenState>,
    client: ClientInfo,
    uri: Uri,
    FormFields(mut form): FormFields<IssueForm>,
) -> Result<Json<TokenRecord>, TokenError> {
    // 请求体未提供时回退到查询参数
    if form.expires_sec.is_none() {
        form.expires_sec = Query::<IssueForm>::try_from_uri(&uri)
            .map_err(|e| TokenError::MalformedForm(e.body_text()))?
            .0
            .expires_sec;
    }

    let record = state
        .service
        .issue(form.expires_sec.as_deref(), client)
        .await?;

    Ok(Json(record))
}

async fn get_token(
    State(state): State<TokenState>,
    Path(id): Path<String>,
) -> Result<Json<TokenRecord>, TokenError> {
    Ok(Json(state.service.get(&id).await?))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

async fn validate_token(
    State(state): State<TokenState>,
    client: ClientInfo,
    headers: HeaderMap,
    FormFields(form): FormFields<ValidateForm>,
) -> Result<Json<ValidationResponse>, TokenError> {
    let credential = match bearer_token(&headers) {
        Some(token) => token,
        None => form
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::InvalidArgument("Missing bearer token".to_string()))?,
    };

    let record = state.service.validate(&credential, client).await?;
    debug!("Token {} accepted", record.id);

    Ok(Json(ValidationResponse {
        valid: true,
        token: record,
    }))
}

async fn revoke_token(
    State(state): State<TokenState>,
    Path(id): Path<String>,
) -> Result<Json<TokenRecord>, TokenError> {
    Ok(Json(state.service.revoke(&id).await?))
}

async fn delete_token(
    State(state): State<TokenState>,
    Path(id): Path<String>,
) -> Result<StatusCode, TokenError> {
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_usages(
    State(state): State<TokenState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TokenUsage>>, TokenError> {
    Ok(Json(state.service.usages(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::TokenSigner;
    use crate::storage::{SqliteTokenStore, StoreOptions, TokenStore};
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderValue, Method, Request},
    };
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    async fn create_test_router() -> (TempDir, Router) {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("handlers.sqlite");
        let store = SqliteTokenStore::open(path.to_str().unwrap(), StoreOptions::default())
            .await
            .unwrap();
        store.migrate().await.unwrap();

        let service = TokenService::new(Arc::new(store), TokenSigner::new(b"handler-secret"));
        (temp_dir, create_router(TokenState::new(service)))
    }

    fn form_request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--XX\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str("--XX--\r\n");

        Request::post(uri)
            .header("content-type", "multipart/form-data; boundary=XX")
            .body(Body::from(body))
            .unwrap()
    }

    async fn token_count(app: &Router) -> usize {
        let response = app
            .clone()
            .oneshot(Request::get("/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();
        json_body(response).await.as_array().unwrap().len()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_issue_without_peer_address() {
        // oneshot 调用没有 ConnectInfo，访问日志不应影响响应
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(form_request(Method::POST, "/tokens", "expires_sec=60"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["token"].is_string());
        assert!(body.get("client_ip").is_none());
    }

    #[tokio::test]
    async fn test_issue_without_content_type_uses_default() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(
                Request::post("/signup")
                    .header("x-forwarded-for", "198.51.100.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["client_ip"], "198.51.100.9");
    }

    #[tokio::test]
    async fn test_issue_reads_query_parameter() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(
                Request::post("/tokens/auth?expires_sec=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_issue_malformed_form_is_bad_gateway() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(form_request(
                Method::POST,
                "/tokens",
                "expires_sec=1&expires_sec=2",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_multipart_invalid_expires_sec_is_rejected() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .clone()
            .oneshot(multipart_request("/tokens", &[("expires_sec", "abc")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(token_count(&app).await, 0);
    }

    #[tokio::test]
    async fn test_multipart_expires_sec_is_honoured() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(multipart_request("/signup", &[("expires_sec", "120")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let issued_at =
            chrono::DateTime::parse_from_rfc3339(body["issued_at"].as_str().unwrap()).unwrap();
        let expires_at =
            chrono::DateTime::parse_from_rfc3339(body["expires_at"].as_str().unwrap()).unwrap();
        assert_eq!((expires_at - issued_at).num_seconds(), 120);
    }

    #[tokio::test]
    async fn test_multipart_duplicate_field_is_bad_gateway() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .clone()
            .oneshot(multipart_request(
                "/tokens",
                &[("expires_sec", "1"), ("expires_sec", "2")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(token_count(&app).await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_body_is_not_treated_as_empty_form() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .clone()
            .oneshot(
                Request::post("/tokens")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"expires_sec":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(token_count(&app).await, 0);

        // 空请求体仍按空表单处理
        let response = app
            .clone()
            .oneshot(
                Request::post("/tokens")
                    .header("content-type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(token_count(&app).await, 1);
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let (_dir, app) = create_test_router().await;

        let response = app
            .clone()
            .oneshot(Request::get("/signup").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = app
            .oneshot(Request::put("/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_validate_missing_credential() {
        let (_dir, app) = create_test_router().await;
        let response = app
            .oneshot(form_request(Method::POST, "/tokens/validate", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_validate_with_form_token() {
        let (_dir, app) = create_test_router().await;
        let issued = json_body(
            app.clone()
                .oneshot(form_request(Method::POST, "/tokens", "expires_sec=600"))
                .await
                .unwrap(),
        )
        .await;

        let body = format!("token={}", issued["token"].as_str().unwrap());
        let response = app
            .oneshot(form_request(Method::POST, "/tokens/validate", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["token"]["id"], issued["id"]);
    }

    #[tokio::test]
    async fn test_unknown_id_routes() {
        let (_dir, app) = create_test_router().await;

        for (method, uri) in [
            (Method::GET, "/tokens/nope"),
            (Method::DELETE, "/tokens/nope"),
            (Method::POST, "/tokens/nope/revoke"),
            (Method::GET, "/tokens/nope/usages"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_health_reports_degraded_store() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("health.sqlite");
        let store = Arc::new(
            SqliteTokenStore::open(path.to_str().unwrap(), StoreOptions::default())
                .await
                .unwrap(),
        );
        let service = TokenService::new(store.clone(), TokenSigner::new(b"s"));
        let app = create_router(TokenState::new(service));

        store.close().await;

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_requests_after_store_close_fail_opaquely() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("closed.sqlite");
        let store = Arc::new(
            SqliteTokenStore::open(path.to_str().unwrap(), StoreOptions::default())
                .await
                .unwrap(),
        );
        store.migrate().await.unwrap();
        let service = TokenService::new(store.clone(), TokenSigner::new(b"s"));
        let app = create_router(TokenState::new(service));

        store.close().await;

        let response = app
            .clone()
            .oneshot(form_request(Method::POST, "/tokens", "expires_sec=60"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal server error");

        let response = app
            .oneshot(Request::get("/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
