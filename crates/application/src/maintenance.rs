//! 后台维护任务：存活巡检与会话清理

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::SessionHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceIntervals {
    pub connection_check: Duration,
    pub session_cleanup: Duration,
}

/// 启动两个周期任务，`token` 取消后退出
pub fn spawn_maintenance(
    hub: Arc<SessionHub>,
    intervals: MaintenanceIntervals,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let sweep_hub = hub.clone();
    let sweep = spawn_periodic(
        "liveness sweep",
        intervals.connection_check,
        token.clone(),
        move || {
            let hub = sweep_hub.clone();
            async move {
                hub.sweep().await;
            }
        },
    );

    let cleanup = spawn_periodic(
        "session cleanup",
        intervals.session_cleanup,
        token,
        move || {
            let hub = hub.clone();
            async move {
                hub.cleanup_sessions().await;
            }
        },
    );

    vec![sweep, cleanup]
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // 启动时不立即执行
        interval.tick().await;
        tracing::info!(job = name, period_ms = period.as_millis() as u64, "maintenance job started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => job().await,
            }
        }

        tracing::info!(job = name, "maintenance job stopped");
    })
}
