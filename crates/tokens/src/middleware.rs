//! HTTP 中间件：请求追踪、访问日志、panic 兜底与客户端信息提取

use crate::metrics::{self, RequestTimer};
use crate::types::ClientInfo;
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, Request},
    http::{HeaderMap, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{MakeSpan, TraceLayer},
};
use tracing::{Span, error, info, info_span};

pub type HttpTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, HttpMakeSpan>;

pub fn http_trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http().make_span_with(HttpMakeSpan)
}

#[derive(Clone, Debug, Default)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        info_span!(
            "http.request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version()
        )
    }
}

/// 从请求头与连接信息中提取客户端信息
///
/// 优先使用 `X-Forwarded-For` 的第一个地址，否则使用连接对端地址
pub fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ClientInfo {
        ip: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent,
    }
}

fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(client_info(&parts.headers, peer_addr(&parts.extensions)))
    }
}

/// 访问日志中间件
///
/// 请求结束后记录客户端地址、方法、路径、状态码与耗时。
/// 地址缺失时记为 `-`，不影响响应本身。
pub async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "<unmatched>".to_string());
    let peer = peer_addr(request.extensions())
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let timer = RequestTimer::new(method.as_str(), &route);
    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = timer.elapsed_ms();
    timer.observe(status.as_u16());

    info!(
        target: "tokend::access",
        "{} {} {} {} {}ms",
        peer,
        method,
        path,
        status.as_u16(),
        latency_ms
    );

    response
}

/// panic 兜底：记录详情，返回不透明的 500
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    metrics::PANICS_RECOVERED.inc();
    error!("Recovered from handler panic: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "code": 500
        })),
    )
        .into_response()
}
