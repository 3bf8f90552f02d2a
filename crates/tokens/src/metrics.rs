//! Prometheus 监控指标
//!
//! 指标注册到模块内的 `REGISTRY`，由 `/metrics` 端点导出

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Once;
use std::time::Instant;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// 签发成功次数
    pub static ref TOKENS_ISSUED: IntCounter = IntCounter::with_opts(
        Opts::new("tokens_issued_total", "Total number of tokens issued").namespace("tokend")
    ).unwrap();

    /// 校验次数（按结果分组）
    pub static ref VALIDATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("token_validations_total", "Total number of token validations")
            .namespace("tokend"),
        &["outcome"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("request_duration_seconds", "HTTP request duration in seconds")
            .namespace("tokend")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "path", "status"]
    ).unwrap();

    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("requests_total", "Total number of HTTP requests").namespace("tokend"),
        &["method", "path", "status"]
    ).unwrap();

    /// 被兜底层捕获的 panic 次数
    pub static ref PANICS_RECOVERED: IntCounter = IntCounter::with_opts(
        Opts::new("panics_recovered_total", "Total number of handler panics recovered")
            .namespace("tokend")
    ).unwrap();
}

/// 注册全部指标，可重复调用
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(TOKENS_ISSUED.clone()))?;
            REGISTRY.register(Box::new(VALIDATIONS.clone()))?;
            REGISTRY.register(Box::new(REQUEST_DURATION.clone()))?;
            REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
            REGISTRY.register(Box::new(PANICS_RECOVERED.clone()))?;
            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// HTTP 请求计时器
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    /// 完成计时并记录指标
    pub fn observe(self, status: u16) {
        let status = status.to_string();
        let labels = [self.method.as_str(), self.path.as_str(), status.as_str()];

        REQUEST_DURATION
            .with_label_values(&labels)
            .observe(self.start.elapsed().as_secs_f64());
        REQUESTS_TOTAL.with_label_values(&labels).inc();
    }
}

/// 导出 Prometheus 文本格式的指标
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
