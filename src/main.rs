use anyhow::Context;
use presigned_uploader::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, AppState,
};
use tracing::info;

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!(
        "{} v{} 启动中...",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await?;
    config.apply_env_overrides();
    config.validate()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config)?;
    info!("应用状态初始化完成");

    let app = presigned_uploader::build_router(app_state);

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v1", addr);
    info!("WebSocket: ws://{}/api/v1/uploads/ws", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址失败: {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听关闭信号失败: {}", e);
            }
            info!("收到 Ctrl+C，开始优雅关闭...");
        })
        .await
        .context("服务器错误")?;

    info!("应用已安全退出");
    Ok(())
}
