//! 会话中枢
//!
//! 把注册表、状态存储、在线巡检、计时器、路由和状态同步组装在一起，
//! 对 Web 层只暴露连接生命周期相关的几个入口。

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use domain::{ConnectionId, DisconnectReason, PresencePolicy, SessionId, WireMessage};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::{PresenceMonitor, SweepReport};
use crate::registry::{ConnectionRecord, ConnectionRegistry, OutboundSender};
use crate::router::{MessageRouter, RouteOutcome};
use crate::session_store::{SessionStats, SessionStore};
use crate::sync::StateSync;
use crate::timer_service::TimerService;

/// 中枢运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub policy: PresencePolicy,
    pub state_sync_delay: Duration,
    pub tick_interval: Duration,
    pub session_inactivity_threshold: Duration,
}

impl HubSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: PresencePolicy {
                inactivity_timeout: config.presence.inactivity_timeout(),
                heartbeat_interval: config.presence.heartbeat_interval(),
                missed_heartbeat_threshold: config.presence.missed_heartbeat_threshold,
                offline_removal_timeout: config.presence.offline_removal_timeout(),
            },
            state_sync_delay: config.session.state_sync_delay(),
            tick_interval: config.timer.tick_interval(),
            session_inactivity_threshold: config.session.inactivity_threshold(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 对外暴露的运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    #[serde(flatten)]
    pub sessions: SessionStats,
    pub connections: usize,
}

pub struct SessionHub {
    registry: Arc<ConnectionRegistry>,
    store: Arc<SessionStore>,
    presence: Arc<PresenceMonitor>,
    timers: TimerService,
    sync: Arc<StateSync>,
    router: MessageRouter,
    settings: HubSettings,
}

impl SessionHub {
    pub fn new(settings: HubSettings, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(SessionStore::new(clock.clone()));
        let presence = Arc::new(PresenceMonitor::new(
            registry.clone(),
            registry.clone(),
            clock,
            settings.policy,
        ));
        let timers = TimerService::new(store.clone(), registry.clone(), settings.tick_interval);
        let sync = Arc::new(StateSync::new(
            registry.clone(),
            store.clone(),
            registry.clone(),
        ));
        let router = MessageRouter::new(
            registry.clone(),
            store.clone(),
            registry.clone(),
            presence.clone(),
            timers.clone(),
            sync.clone(),
        );

        Self {
            registry,
            store,
            presence,
            timers,
            sync,
            router,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// 登记新连接，补发已知投票，并在延迟后推送完整状态
    pub async fn connect(
        &self,
        session: SessionId,
        outbound: OutboundSender,
    ) -> Result<ConnectionId, ApplicationError> {
        let id = self
            .registry
            .add(session.clone(), outbound, self.store.now())
            .await;
        self.store.touch(&session).await;
        tracing::info!(session = %session, connection = %id, "connected");

        self.sync.bootstrap(id, &session).await?;

        let sync = self.sync.clone();
        let registry = self.registry.clone();
        let delay = self.settings.state_sync_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.get(id).await.is_none() {
                return;
            }
            if let Err(err) = sync.send_state(id, &session).await {
                tracing::warn!(session = %session, connection = %id, error = %err, "initial state sync failed");
            }
        });

        Ok(id)
    }

    /// 处理一条入站文本帧；格式错误的消息只丢弃这一条
    pub async fn handle_inbound(
        &self,
        connection: ConnectionId,
        text: &str,
    ) -> Result<RouteOutcome, ApplicationError> {
        let message = match WireMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(connection = %connection, error = %err, "rejected malformed message");
                return Ok(RouteOutcome::Continue);
            }
        };

        tracing::debug!(
            connection = %connection,
            kind = %message.kind,
            sender = %message.sender,
            "inbound message"
        );
        self.router.route(connection, message).await
    }

    pub async fn record_pong(&self, connection: ConnectionId) {
        self.presence.record_pong(connection).await;
    }

    /// 连接结束，重复调用无副作用
    pub async fn disconnect(
        &self,
        connection: ConnectionId,
        reason: DisconnectReason,
    ) -> Option<ConnectionRecord> {
        self.presence.terminate(connection, reason).await
    }

    pub async fn sweep(&self) -> SweepReport {
        self.presence.sweep().await
    }

    /// 回收长期无活动的会话
    pub async fn cleanup_sessions(&self) -> usize {
        let cleaned = self
            .store
            .cleanup_inactive(self.settings.session_inactivity_threshold)
            .await;
        if cleaned > 0 {
            let stats = self.store.stats().await;
            tracing::info!(
                cleaned,
                active_sessions = stats.active_sessions,
                "cleaned up inactive sessions"
            );
            tracing::debug!(
                active_sessions = stats.active_sessions,
                total_votes = stats.total_votes,
                revealed_sessions = stats.revealed_sessions,
                "session stats"
            );
        }
        cleaned
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.store.stats().await,
            connections: self.registry.connection_count().await,
        }
    }

    /// 停止计时器循环，关闭所有连接
    pub async fn shutdown(&self) {
        self.timers.shutdown().await;
        for session in self.registry.session_ids().await {
            for record in self.registry.list_by_session(&session).await {
                let _ = record.close();
            }
        }
    }
}
