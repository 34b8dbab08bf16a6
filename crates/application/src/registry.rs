//! 连接注册表
//!
//! 按会话分片保存所有打开的连接。外层锁只用来查找分片，
//! 不同会话之间不会争用同一把分片锁。每个连接持有一个无界发送通道，
//! 由连接自己的写任务消费，慢连接不会阻塞扇出。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ConnectionId, Content, Fingerprint, Liveness, Participant, SessionId, Timestamp, WireMessage,
    UNKNOWN_SENDER,
};
use tokio::sync::{mpsc, RwLock};

use crate::broadcaster::{BroadcastError, BroadcastReport, MessageBroadcaster};

/// 写任务要执行的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// 注册表中的一条连接记录
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub session: SessionId,
    pub fingerprint: Option<Fingerprint>,
    pub name: String,
    /// 最近一次广播出去的投票，用于给新加入者补发
    pub last_known_vote: Option<Content>,
    pub liveness: Liveness,
    pub connected_at: Timestamp,
    outbound: OutboundSender,
}

impl ConnectionRecord {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            UNKNOWN_SENDER
        } else {
            &self.name
        }
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// 只有已识别指纹的连接才算会话成员
    pub fn participant(&self) -> Option<Participant> {
        self.fingerprint.as_ref().map(|fingerprint| Participant {
            fingerprint: fingerprint.clone(),
            name: self.display_name().to_string(),
        })
    }

    /// 通知写任务关闭连接
    pub fn close(&self) -> Result<(), BroadcastError> {
        self.push(Outbound::Close)
    }

    fn push(&self, frame: Outbound) -> Result<(), BroadcastError> {
        self.outbound
            .send(frame)
            .map_err(|_| BroadcastError::ConnectionClosed(self.id))
    }
}

type Shard = Arc<RwLock<HashMap<ConnectionId, ConnectionRecord>>>;

#[derive(Default)]
pub struct ConnectionRegistry {
    shards: RwLock<HashMap<SessionId, Shard>>,
    index: RwLock<HashMap<ConnectionId, SessionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新连接，连接所属会话在整个生命周期内不变
    pub async fn add(
        &self,
        session: SessionId,
        outbound: OutboundSender,
        now: Timestamp,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let record = ConnectionRecord {
            id,
            session: session.clone(),
            fingerprint: None,
            name: String::new(),
            last_known_vote: None,
            liveness: Liveness::new(now),
            connected_at: now,
            outbound,
        };

        {
            // 持有外层锁插入，避免与移除最后一个连接时删除分片交错
            let mut shards = self.shards.write().await;
            let shard = shards.entry(session.clone()).or_default().clone();
            shard.write().await.insert(id, record);
        }
        self.index.write().await.insert(id, session);
        id
    }

    /// 移除连接；第二次移除返回 None
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let session = self.index.write().await.remove(&id)?;
        let mut shards = self.shards.write().await;
        let shard = shards.get(&session)?.clone();
        let mut connections = shard.write().await;
        let removed = connections.remove(&id);
        if connections.is_empty() {
            shards.remove(&session);
        }
        removed
    }

    async fn shard(&self, session: &SessionId) -> Option<Shard> {
        self.shards.read().await.get(session).cloned()
    }

    async fn session_of(&self, id: ConnectionId) -> Option<SessionId> {
        self.index.read().await.get(&id).cloned()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let session = self.session_of(id).await?;
        let shard = self.shard(&session).await?;
        let connections = shard.read().await;
        connections.get(&id).cloned()
    }

    /// 会话内连接的快照，顺序不保证
    pub async fn list_by_session(&self, session: &SessionId) -> Vec<ConnectionRecord> {
        match self.shard(session).await {
            Some(shard) => shard.read().await.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.shards.read().await.keys().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// 修改单个连接的元数据
    pub async fn update<F, R>(&self, id: ConnectionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut ConnectionRecord) -> R,
    {
        let session = self.session_of(id).await?;
        let shard = self.shard(&session).await?;
        let mut connections = shard.write().await;
        connections.get_mut(&id).map(f)
    }

    /// 在同一把分片锁下修改会话内所有连接
    pub async fn update_session<F>(&self, session: &SessionId, mut f: F)
    where
        F: FnMut(&mut ConnectionRecord),
    {
        if let Some(shard) = self.shard(session).await {
            let mut connections = shard.write().await;
            connections.values_mut().for_each(|record| f(record));
        }
    }

    pub async fn ping(&self, id: ConnectionId) -> Result<(), BroadcastError> {
        self.push(id, Outbound::Ping).await
    }

    /// 通知写任务关闭连接，记录仍需调用方移除
    pub async fn terminate(&self, id: ConnectionId) -> Result<(), BroadcastError> {
        self.push(id, Outbound::Close).await
    }

    async fn push(&self, id: ConnectionId, frame: Outbound) -> Result<(), BroadcastError> {
        let session = self
            .session_of(id)
            .await
            .ok_or(BroadcastError::ConnectionClosed(id))?;
        let shard = self
            .shard(&session)
            .await
            .ok_or(BroadcastError::ConnectionClosed(id))?;
        let connections = shard.read().await;
        let record = connections
            .get(&id)
            .ok_or(BroadcastError::ConnectionClosed(id))?;
        record.push(frame)
    }
}

fn encode(message: &WireMessage) -> Result<Arc<str>, BroadcastError> {
    message
        .encode()
        .map(Arc::from)
        .map_err(|err| BroadcastError::failed(err.to_string()))
}

#[async_trait]
impl MessageBroadcaster for ConnectionRegistry {
    async fn broadcast(
        &self,
        session: &SessionId,
        message: &WireMessage,
        exclude: Option<ConnectionId>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let payload = encode(message)?;
        let mut report = BroadcastReport::default();
        let Some(shard) = self.shard(session).await else {
            return Ok(report);
        };

        let connections = shard.read().await;
        for record in connections.values() {
            if Some(record.id) == exclude || !record.is_open() {
                continue;
            }
            match record.push(Outbound::Text(payload.clone())) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        session = %session,
                        connection = %record.id,
                        error = %err,
                        "broadcast to connection failed"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn send_to(
        &self,
        connection: ConnectionId,
        message: &WireMessage,
    ) -> Result<(), BroadcastError> {
        let payload = encode(message)?;
        self.push(connection, Outbound::Text(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::MessageType;

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).unwrap()
    }

    async fn connect(
        registry: &ConnectionRegistry,
        id: &str,
    ) -> (ConnectionId, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.add(session(id), tx, Utc::now()).await;
        (conn, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn chat() -> WireMessage {
        WireMessage::new("alice", Some(Content::text("hi")), MessageType::Chat, Utc::now())
    }

    #[tokio::test]
    async fn broadcast_excludes_only_the_given_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry, "s1").await;
        let (_b, mut rx_b) = connect(&registry, "s1").await;
        let (_c, mut rx_c) = connect(&registry, "s1").await;

        let report = registry
            .broadcast(&session("s1"), &chat(), Some(a))
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert_eq!(drain(&mut rx_c).len(), 1);

        let report = registry.broadcast(&session("s1"), &chat(), None).await.unwrap();
        assert_eq!(report.delivered, 3);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = connect(&registry, "s1").await;
        let (_b, mut rx_b) = connect(&registry, "s2").await;

        registry.broadcast(&session("s1"), &chat(), None).await.unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn closed_receivers_are_skipped() {
        let registry = ConnectionRegistry::new();
        let (_a, rx_a) = connect(&registry, "s1").await;
        let (_b, mut rx_b) = connect(&registry, "s1").await;
        drop(rx_a);

        let report = registry.broadcast(&session("s1"), &chat(), None).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn remove_drops_empty_shards() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = connect(&registry, "s1").await;
        assert_eq!(registry.connection_count().await, 1);

        assert!(registry.remove(a).await.is_some());
        assert!(registry.remove(a).await.is_none());
        assert!(registry.session_ids().await.is_empty());
        assert!(registry.list_by_session(&session("s1")).await.is_empty());
    }

    #[tokio::test]
    async fn update_and_participants() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&registry, "s1").await;
        let (_b, _rx_b) = connect(&registry, "s1").await;

        registry
            .update(a, |record| {
                record.name = "alice".into();
                record.fingerprint = Some(Fingerprint::from("fp-a"));
            })
            .await;

        let participants: Vec<_> = registry
            .list_by_session(&session("s1"))
            .await
            .iter()
            .filter_map(ConnectionRecord::participant)
            .collect();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].name, "alice");
    }

    #[tokio::test]
    async fn terminate_and_ping_reach_the_writer() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = connect(&registry, "s1").await;
        registry.ping(a).await.unwrap();
        registry.terminate(a).await.unwrap();
        assert_eq!(drain(&mut rx), vec![Outbound::Ping, Outbound::Close]);
    }
}
