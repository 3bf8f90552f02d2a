//! HTTP 服务生命周期
//!
//! 绑定监听端口并在后台任务中运行 axum 服务；收到关闭广播后停止接受新连接，
//! 等待进行中的请求结束。

use anyhow::Context;
use std::net::SocketAddr;
use tokend_common::config::TokendConfig;
use tokens::TokenState;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 运行中的 HTTP 服务
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

/// HTTP 服务
pub struct HttpServer {
    config: TokendConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl HttpServer {
    pub fn new(config: TokendConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            shutdown_tx,
        }
    }

    /// 绑定端口并启动服务
    ///
    /// 绑定失败直接返回错误；服务运行期间的错误会广播关闭信号
    pub async fn start(&self, state: TokenState) -> anyhow::Result<RunningServer> {
        let bind_addr = self.config.bind.http.bind_addr();

        let listener = tokio::net::TcpListener::bind(bind_addr.as_str())
            .await
            .with_context(|| format!("Failed to bind to address '{bind_addr}'"))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read local listener address")?;

        let app = tokens::create_router(state);
        info!("HTTP server listening on {}", local_addr);

        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server received shutdown signal, draining in-flight requests");
            });

            if let Err(e) = server.await {
                error!("HTTP server error: {}", e);
                let _ = shutdown_tx.send(());
            }
            info!("HTTP server stopped");
        });

        Ok(RunningServer { local_addr, handle })
    }
}
