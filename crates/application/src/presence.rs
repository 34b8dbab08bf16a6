//! 服务端在线状态巡检
//!
//! 周期巡检每个连接：传输层 ping/pong、无活动超时、离线驱逐、心跳计数。
//! 判定规则本身在 [`domain::Liveness`]，这里负责执行结论并广播。

use std::sync::Arc;

use domain::{
    ConnectionId, Content, DisconnectReason, LivenessVerdict, MessageType, PresencePolicy,
    WireMessage,
};

use crate::broadcaster::MessageBroadcaster;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::{ConnectionRecord, ConnectionRegistry};

/// 一轮巡检的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub went_offline: usize,
    pub terminated: usize,
}

pub struct PresenceMonitor {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<dyn MessageBroadcaster>,
    clock: Arc<dyn Clock>,
    policy: PresencePolicy,
}

impl PresenceMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<dyn MessageBroadcaster>,
        clock: Arc<dyn Clock>,
        policy: PresencePolicy,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    /// 巡检所有会话的所有连接
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for session in self.registry.session_ids().await {
            for record in self.registry.list_by_session(&session).await {
                let verdict = self
                    .registry
                    .update(record.id, |r| r.liveness.evaluate(&self.policy, now))
                    .await;

                match verdict {
                    None => continue,
                    Some(LivenessVerdict::Terminate(reason)) => {
                        if self.terminate(record.id, reason).await.is_some() {
                            report.terminated += 1;
                        }
                    }
                    Some(LivenessVerdict::WentOffline) => {
                        report.went_offline += 1;
                        tracing::info!(
                            session = %session,
                            connection = %record.id,
                            name = record.display_name(),
                            "connection marked offline after missed heartbeats"
                        );
                        self.announce(&record, MessageType::StatusOffline, None).await;
                        self.ping(record.id).await;
                        report.pinged += 1;
                    }
                    Some(LivenessVerdict::Ping) => {
                        self.ping(record.id).await;
                        report.pinged += 1;
                    }
                }
            }
        }

        if report.terminated > 0 || report.went_offline > 0 {
            tracing::debug!(?report, "liveness sweep finished");
        }
        report
    }

    /// 移除连接、关闭 socket，并按原因决定是否广播 DISCONNECT
    ///
    /// 同一连接只会生效一次，后续调用返回 None。
    pub async fn terminate(
        &self,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> Option<ConnectionRecord> {
        let record = self.registry.remove(id).await?;
        // 写任务可能已经退出
        let _ = record.close();

        tracing::info!(
            session = %record.session,
            connection = %id,
            name = record.display_name(),
            reason = reason.as_str(),
            "disconnected"
        );

        if reason.announces() {
            let content = Content::text(reason.broadcast_content());
            self.announce(&record, MessageType::Disconnect, Some(content))
                .await;
        }
        Some(record)
    }

    /// 处理应用层心跳；离线的连接恢复时广播 STATUS_ONLINE
    pub async fn record_heartbeat(&self, id: ConnectionId) -> Result<(), ApplicationError> {
        let now = self.clock.now();
        let (was_offline, record) = self
            .registry
            .update(id, |r| (r.liveness.record_heartbeat(now), r.clone()))
            .await
            .ok_or(ApplicationError::ConnectionNotFound(id))?;

        if was_offline {
            tracing::info!(
                session = %record.session,
                connection = %id,
                "connection back online"
            );
            self.announce(&record, MessageType::StatusOnline, None).await;
        }
        Ok(())
    }

    pub async fn record_pong(&self, id: ConnectionId) {
        self.registry.update(id, |r| r.liveness.record_pong()).await;
    }

    async fn ping(&self, id: ConnectionId) {
        if let Err(err) = self.registry.ping(id).await {
            tracing::debug!(connection = %id, error = %err, "ping not delivered");
        }
    }

    /// 以该连接的名义向会话内其它连接广播
    async fn announce(&self, record: &ConnectionRecord, kind: MessageType, content: Option<Content>) {
        let message = WireMessage::new(record.display_name(), content, kind, self.clock.now())
            .with_fingerprint(record.fingerprint.clone());
        if let Err(err) = self
            .broadcaster
            .broadcast(&record.session, &message, Some(record.id))
            .await
        {
            tracing::warn!(
                session = %record.session,
                kind = %kind,
                error = %err,
                "presence broadcast failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{BroadcastReport, MockMessageBroadcaster};
    use crate::clock::ManualClock;
    use crate::registry::{Outbound, OutboundReceiver};
    use domain::{Fingerprint, SessionId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn policy() -> PresencePolicy {
        PresencePolicy {
            inactivity_timeout: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(10),
            missed_heartbeat_threshold: 2,
            offline_removal_timeout: Duration::from_secs(3600),
        }
    }

    async fn setup(
        broadcaster: MockMessageBroadcaster,
    ) -> (PresenceMonitor, Arc<ConnectionRegistry>, Arc<ManualClock>, ConnectionId, OutboundReceiver) {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry
            .add(SessionId::parse("s1").unwrap(), tx, clock.now())
            .await;
        registry
            .update(id, |r| {
                r.name = "alice".into();
                r.fingerprint = Some(Fingerprint::from("fp-a"));
            })
            .await;
        let monitor = PresenceMonitor::new(
            registry.clone(),
            Arc::new(broadcaster),
            clock.clone(),
            policy(),
        );
        (monitor, registry, clock, id, rx)
    }

    #[tokio::test]
    async fn unanswered_ping_terminates_with_disconnect_broadcast() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster
            .expect_broadcast()
            .withf(|_, message, _| {
                message.kind == MessageType::Disconnect
                    && message.content == Some(Content::text("disconnect"))
                    && message.sender == "alice"
            })
            .times(1)
            .returning(|_, _, _| Ok(BroadcastReport::default()));

        let (monitor, registry, _clock, id, mut rx) = setup(broadcaster).await;

        let first = monitor.sweep().await;
        assert_eq!(first.pinged, 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        let second = monitor.sweep().await;
        assert_eq!(second.terminated, 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn pong_between_sweeps_keeps_connection() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster.expect_broadcast().times(0);
        let (monitor, registry, _clock, id, _rx) = setup(broadcaster).await;

        monitor.sweep().await;
        monitor.record_pong(id).await;
        let report = monitor.sweep().await;
        assert_eq!(report.terminated, 0);
        assert!(registry.get(id).await.is_some());
    }

    #[tokio::test]
    async fn inactivity_broadcasts_timeout() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster
            .expect_broadcast()
            .withf(|_, message, _| message.content == Some(Content::text("timeout")))
            .times(1)
            .returning(|_, _, _| Ok(BroadcastReport::default()));
        let (monitor, _registry, clock, _id, _rx) = setup(broadcaster).await;

        clock.advance(Duration::from_secs(3601));
        assert_eq!(monitor.sweep().await.terminated, 1);
    }

    #[tokio::test]
    async fn missed_heartbeats_go_offline_but_stay_registered() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster
            .expect_broadcast()
            .withf(|_, message, _| message.kind == MessageType::StatusOffline)
            .times(1)
            .returning(|_, _, _| Ok(BroadcastReport::default()));
        let (monitor, registry, clock, id, _rx) = setup(broadcaster).await;

        for _ in 0..3 {
            clock.advance(Duration::from_secs(16));
            monitor.sweep().await;
            monitor.record_pong(id).await;
        }

        let record = registry.get(id).await.unwrap();
        assert!(record.liveness.is_offline());
        assert!(record.is_open());
    }

    #[tokio::test]
    async fn heartbeat_after_offline_announces_online() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster
            .expect_broadcast()
            .withf(|_, message, _| message.kind == MessageType::StatusOnline)
            .times(1)
            .returning(|_, _, _| Ok(BroadcastReport::default()));
        let (monitor, registry, clock, id, _rx) = setup(broadcaster).await;

        registry
            .update(id, |r| r.liveness.offline_since = Some(clock.now()))
            .await;
        monitor.record_heartbeat(id).await.unwrap();
        monitor.record_heartbeat(id).await.unwrap();

        let record = registry.get(id).await.unwrap();
        assert!(!record.liveness.is_offline());
        assert_eq!(record.liveness.missed_heartbeats, 0);
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_silent_for_clean_close() {
        let mut broadcaster = MockMessageBroadcaster::new();
        broadcaster.expect_broadcast().times(0);
        let (monitor, _registry, _clock, id, _rx) = setup(broadcaster).await;

        assert!(monitor.terminate(id, DisconnectReason::Closed).await.is_some());
        assert!(monitor.terminate(id, DisconnectReason::TransportError).await.is_none());
    }
}
