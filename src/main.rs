//! tokend 主程序
//!
//! 加载配置、打开 token 存储并启动 HTTP 服务；收到信号后按顺序关闭：
//! 停止接受连接 → 在宽限期内等待请求完成 → 关闭存储

mod cli;
mod error;
mod observability;

use clap::Parser;
use observability::init_observability;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokend::HttpServer;
use tokend_common::config::TokendConfig;
use tokens::{StoreOptions, TokenStore};
use tracing::{error, info, warn};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path = ApplicationLauncher::find_config_file(
                config_file.as_ref().unwrap_or(&cli.config),
            )?;
            ApplicationLauncher::test_config_file(config_path.as_deref())
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            // Create Tokio runtime（before running the application）
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            // Run the asynchronous application
            runtime.block_on(ApplicationLauncher::run_application(config_path.as_deref()))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    ///
    /// 显式指定的路径必须存在；默认位置都不存在时返回 `None`，使用内置默认配置
    fn find_config_file(provided_path: &PathBuf) -> Result<Option<PathBuf>> {
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(Some(provided_path.clone()));
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        let fallback_paths = [
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from("/etc/tokend/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(Some(path.clone()));
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_info!("No configuration file found, using built-in defaults");
        Ok(None)
    }

    /// 加载配置并应用环境变量覆盖
    fn load_config(config_path: Option<&Path>) -> Result<TokendConfig> {
        let mut config = match config_path {
            Some(path) => TokendConfig::from_file(path)?,
            None => TokendConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// 打印校验结果，存在非警告问题时返回错误
    fn report_validation(config: &TokendConfig) -> Result<()> {
        if let Err(errors) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::service_validation("配置验证失败，请修复上述错误"));
            }
        }
        Ok(())
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: Option<&Path>) -> Result<()> {
        match Self::load_config(config_path) {
            Ok(config) => {
                bootstrap_info!("✅ 配置解析成功: {:?}", config_path);
                Self::report_validation(&config)?;
                bootstrap_info!("✅ 配置验证通过");
                Ok(())
            }
            Err(e) => {
                bootstrap_error!("❌ 配置解析失败: {}", e);
                Err(Error::service_validation(format!("配置解析失败: {e}")))
            }
        }
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: Option<&Path>) -> Result<()> {
        bootstrap_info!("📄 加载配置: {:?}", config_path);

        let config = match Self::load_config(config_path) {
            Ok(config) => {
                bootstrap_info!("✅ 配置加载成功");
                config
            }
            Err(e) => {
                bootstrap_error!("❌ 配置加载失败: {}", e);
                return Err(e);
            }
        };
        Self::report_validation(&config)?;

        // 初始化可观测性系统
        let _observability_guard = init_observability(&config)?;

        if let Err(e) = tokens::register_metrics() {
            warn!(
                "Prometheus metrics registration warning (may already be registered): {}",
                e
            );
        }

        Self::run_service(config).await
    }

    async fn run_service(config: TokendConfig) -> Result<()> {
        info!("🚀 启动 tokend: name={}, env={}", config.name, config.env);

        let options = StoreOptions {
            busy_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(config.database.operation_timeout_secs),
            max_lifetime: (config.database.max_lifetime_secs > 0)
                .then(|| Duration::from_secs(config.database.max_lifetime_secs)),
        };

        // 存储必须在接受请求之前就绪
        let (state, store) = match tokens::create_token_state(
            &config.database.uri,
            options,
            config.signing.jwt_secret.as_bytes(),
            config.signing.default_ttl_secs,
        )
        .await
        {
            Ok(created) => created,
            Err(e) => {
                error!("❌ 数据库初始化失败: {}", e);
                return Err(e.into());
            }
        };
        info!("✅ 数据库初始化完成: {}", config.database.uri);

        // 初始化全局关闭通道
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(10);
        let mut shutdown_rx = shutdown_tx.subscribe();
        setup_signal_handler(shutdown_tx.clone()).await;

        let server = HttpServer::new(config.clone(), shutdown_tx.clone());
        let mut running = match server.start(state).await {
            Ok(running) => running,
            Err(e) => {
                error!("❌ HTTP 服务启动失败: {:#}", e);
                store.close().await;
                return Err(Error::service_startup(format!("{e:#}")));
            }
        };

        Self::display_service_info(&config, running.local_addr);

        // 等待关闭信号；服务任务提前结束也视为关闭
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            result = &mut running.handle => {
                if let Err(e) = result {
                    error!("HTTP server task terminated unexpectedly: {}", e);
                }
                let _ = shutdown_tx.send(());
            }
        }

        if !running.handle.is_finished() {
            let grace = Duration::from_secs(config.shutdown_grace_secs);
            info!("等待进行中的请求完成（最长 {:?}）...", grace);
            match tokio::time::timeout(grace, &mut running.handle).await {
                Ok(Ok(())) => info!("进行中的请求已全部完成"),
                Ok(Err(e)) => error!("HTTP server task failed: {}", e),
                Err(_) => {
                    // abort 只停止 accept 循环；axum 已派生的连接任务仍会运行，
                    // 随后关闭存储时它们的请求以 500 失败，进程退出时一并结束
                    warn!("宽限期已到，停止 accept 循环并放弃剩余连接");
                    running.handle.abort();
                }
            }
        }

        // 所有请求结束后才关闭存储
        store.close().await;

        info!("🛑 tokend 已安全关闭");
        Ok(())
    }

    /// 显示服务信息
    fn display_service_info(config: &TokendConfig, local_addr: std::net::SocketAddr) {
        let base = format!("http://{local_addr}");
        info!("✅ 服务已启动");
        info!("📡 HTTP 服务器监听在: {}", base);
        if config.env == "dev" {
            info!("🔧 可用的API端点:");
            info!("  - GET  {}/ping", base);
            info!("  - GET  {}/tokens", base);
            info!("  - POST {}/tokens (expires_sec)", base);
            info!("  - POST {}/tokens/validate", base);
            info!("  - GET  {}/health", base);
            info!("  - GET  {}/metrics", base);
        }
    }
}

/// 设置信号处理程序（Ctrl-C / SIGTERM）
async fn setup_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("无法监听Ctrl-C信号: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("无法监听SIGTERM信号: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("收到Ctrl-C信号，开始优雅关闭..."),
            _ = terminate => info!("收到SIGTERM信号，开始优雅关闭..."),
        }
        let _ = shutdown_tx.send(());
    });
}
