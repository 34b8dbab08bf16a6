//! 主应用程序入口
//!
//! 加载配置，启动后台维护任务和 Axum Web 服务。

use std::time::Duration;

use application::{spawn_maintenance, MaintenanceIntervals};
use config::AppConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志，RUST_LOG 优先于配置
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = AppState::from_config(&config);
    let hub = state.hub.clone();

    let token = CancellationToken::new();
    let jobs = spawn_maintenance(
        hub.clone(),
        MaintenanceIntervals {
            connection_check: config.presence.connection_check_interval(),
            session_cleanup: config.session.cleanup_interval(),
        },
        token.clone(),
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        address = %addr,
        check_interval_ms = config.presence.connection_check_interval_ms,
        inactivity_timeout_ms = config.presence.inactivity_timeout_ms,
        cleanup_interval_ms = config.session.cleanup_interval_ms,
        "会话服务器启动"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("正在关闭");
    token.cancel();
    hub.shutdown().await;
    for job in jobs {
        if tokio::time::timeout(Duration::from_secs(5), job).await.is_err() {
            tracing::warn!("maintenance job did not stop in time");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
