//! 状态同步：快照组装与新连接引导

use std::sync::Arc;

use domain::{
    ConnectionId, Content, MessageType, SessionId, SessionSnapshot, WireMessage, VOTES_REVEALED,
};

use crate::broadcaster::MessageBroadcaster;
use crate::error::ApplicationError;
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use crate::session_store::SessionStore;

pub struct StateSync {
    registry: Arc<ConnectionRegistry>,
    store: Arc<SessionStore>,
    broadcaster: Arc<dyn MessageBroadcaster>,
}

impl StateSync {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<SessionStore>,
        broadcaster: Arc<dyn MessageBroadcaster>,
    ) -> Self {
        Self {
            registry,
            store,
            broadcaster,
        }
    }

    /// 组装会话快照；只有带指纹的连接会出现在 participants 里
    pub async fn snapshot(&self, session: &SessionId) -> SessionSnapshot {
        let mut participants: Vec<_> = self
            .registry
            .list_by_session(session)
            .await
            .iter()
            .filter_map(ConnectionRecord::participant)
            .collect();
        participants.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let state = self.store.lock(session).await;
        SessionSnapshot::capture(&state, participants)
    }

    /// 把完整状态作为 STATE_SYNC 只发给一个连接
    pub async fn send_state(
        &self,
        connection: ConnectionId,
        session: &SessionId,
    ) -> Result<(), ApplicationError> {
        let snapshot = self.snapshot(session).await;
        let message = WireMessage::server(
            MessageType::StateSync,
            Some(snapshot.to_content()?),
            self.store.now(),
        );
        self.broadcaster.send_to(connection, &message).await?;

        tracing::debug!(
            session = %session,
            connection = %connection,
            votes = snapshot.votes.len(),
            participants = snapshot.participants.len(),
            revealed = snapshot.votes_revealed,
            "sent full state sync"
        );
        Ok(())
    }

    /// 新连接建立时补发当前已知的投票与亮牌状态，返回发送的消息数
    pub async fn bootstrap(
        &self,
        connection: ConnectionId,
        session: &SessionId,
    ) -> Result<usize, ApplicationError> {
        let now = self.store.now();
        let mut sent = 0;

        for record in self.registry.list_by_session(session).await {
            if record.id == connection || record.fingerprint.is_none() {
                continue;
            }
            let message = WireMessage::new(
                record.display_name(),
                record.last_known_vote.clone(),
                MessageType::Points,
                now,
            )
            .with_fingerprint(record.fingerprint.clone());
            self.broadcaster.send_to(connection, &message).await?;
            sent += 1;
        }

        if self.store.are_votes_revealed(session).await {
            let message = WireMessage::server(
                MessageType::ShowVotes,
                Some(Content::text(VOTES_REVEALED)),
                now,
            );
            self.broadcaster.send_to(connection, &message).await?;
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::{Outbound, OutboundReceiver};
    use chrono::Utc;
    use domain::Fingerprint;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        store: Arc<SessionStore>,
        sync: StateSync,
        session: SessionId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(SessionStore::new(Arc::new(SystemClock)));
        let sync = StateSync::new(registry.clone(), store.clone(), registry.clone());
        Fixture {
            registry,
            store,
            sync,
            session: SessionId::parse("s1").unwrap(),
        }
    }

    async fn join(f: &Fixture, name: &str, fp: Option<&str>) -> (ConnectionId, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = f.registry.add(f.session.clone(), tx, Utc::now()).await;
        let name = name.to_string();
        let fp = fp.map(Fingerprint::from);
        f.registry
            .update(id, move |r| {
                r.name = name;
                r.fingerprint = fp;
            })
            .await;
        (id, rx)
    }

    fn decode(frame: Outbound) -> WireMessage {
        match frame {
            Outbound::Text(text) => WireMessage::decode(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_lists_only_identified_participants() {
        let f = fixture();
        join(&f, "alice", Some("fp-a")).await;
        join(&f, "", None).await;
        f.store
            .set_vote(&f.session, Fingerprint::from("fp-a"), Some(Content::number(5)))
            .await;

        let snapshot = f.sync.snapshot(&f.session).await;
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].name, "alice");
        assert_eq!(
            snapshot.votes.get(&Fingerprint::from("fp-a")),
            Some(&Some(Content::number(5)))
        );
    }

    #[tokio::test]
    async fn state_sync_goes_to_requester_only() {
        let f = fixture();
        let (a, mut rx_a) = join(&f, "alice", Some("fp-a")).await;
        let (_b, mut rx_b) = join(&f, "bob", Some("fp-b")).await;
        f.store.reveal_votes(&f.session).await;

        f.sync.send_state(a, &f.session).await.unwrap();
        let message = decode(rx_a.try_recv().unwrap());
        assert_eq!(message.kind, MessageType::StateSync);
        assert_eq!(message.sender, "server");
        let snapshot = SessionSnapshot::from_content(message.content.as_ref()).unwrap();
        assert!(snapshot.votes_revealed);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn bootstrap_replays_known_votes_and_reveal() {
        let f = fixture();
        let (a, _rx_a) = join(&f, "alice", Some("fp-a")).await;
        join(&f, "anon", None).await;
        f.registry
            .update(a, |r| r.last_known_vote = Some(Content::number(8)))
            .await;
        f.store.reveal_votes(&f.session).await;

        let (newcomer, mut rx) = join(&f, "", None).await;
        let sent = f.sync.bootstrap(newcomer, &f.session).await.unwrap();
        assert_eq!(sent, 2);

        let points = decode(rx.try_recv().unwrap());
        assert_eq!(points.kind, MessageType::Points);
        assert_eq!(points.sender, "alice");
        assert_eq!(points.content, Some(Content::number(8)));
        assert_eq!(points.fingerprint, Some(Fingerprint::from("fp-a")));

        let reveal = decode(rx.try_recv().unwrap());
        assert_eq!(reveal.kind, MessageType::ShowVotes);
        assert_eq!(reveal.content, Some(Content::text("votes_revealed")));
    }
}
