//! 入站消息路由
//!
//! 每条消息先做改名检测和连接元数据更新，再按 [`Route`] 分派。
//! 没有特殊处理的类型走 [`Route::Echo`]，原样广播给整个会话。

use std::sync::Arc;

use domain::{
    ConnectionId, Content, DisconnectReason, MessageType, PointsPayload, SessionId, TimerCommand,
    WireMessage, DISCONNECT,
};

use crate::broadcaster::MessageBroadcaster;
use crate::error::ApplicationError;
use crate::presence::PresenceMonitor;
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use crate::session_store::SessionStore;
use crate::sync::StateSync;
use crate::timer_service::TimerService;

/// 入站消息的处理方式
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Heartbeat,
    UserLeft,
    Points(PointsPayload),
    ShowVotes,
    ClearVotes,
    RequestState,
    Description,
    Timer(TimerCommand),
    Echo,
}

impl Route {
    pub fn of(message: &WireMessage) -> Self {
        match message.kind {
            MessageType::Heartbeat => Route::Heartbeat,
            MessageType::UserLeft => Route::UserLeft,
            MessageType::Points => {
                Route::Points(PointsPayload::from_content(message.content.as_ref()))
            }
            MessageType::ShowVotes => Route::ShowVotes,
            MessageType::ClearVotes => Route::ClearVotes,
            MessageType::RequestState => Route::RequestState,
            MessageType::Description => Route::Description,
            MessageType::StartTimer
            | MessageType::PauseTimer
            | MessageType::ResumeTimer
            | MessageType::StopTimer
            | MessageType::ExtendTimer => {
                TimerCommand::from_message(message.kind, message.content.as_ref())
                    .map(Route::Timer)
                    .unwrap_or(Route::Echo)
            }
            MessageType::Chat
            | MessageType::Action
            | MessageType::Disconnect
            | MessageType::Join
            | MessageType::StatusAfk
            | MessageType::StatusOnline
            | MessageType::StatusOffline
            | MessageType::NameChanged
            | MessageType::StateSync
            | MessageType::TimerTick => Route::Echo,
        }
    }
}

/// 路由完成后连接的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    Close,
}

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<SessionStore>,
    broadcaster: Arc<dyn MessageBroadcaster>,
    presence: Arc<PresenceMonitor>,
    timers: TimerService,
    sync: Arc<StateSync>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<SessionStore>,
        broadcaster: Arc<dyn MessageBroadcaster>,
        presence: Arc<PresenceMonitor>,
        timers: TimerService,
        sync: Arc<StateSync>,
    ) -> Self {
        Self {
            registry,
            store,
            broadcaster,
            presence,
            timers,
            sync,
        }
    }

    pub async fn route(
        &self,
        connection: ConnectionId,
        message: WireMessage,
    ) -> Result<RouteOutcome, ApplicationError> {
        let record = self
            .registry
            .get(connection)
            .await
            .ok_or(ApplicationError::ConnectionNotFound(connection))?;
        let session = record.session.clone();

        self.detect_name_change(&record, &message).await?;

        let now = self.store.now();
        let sender = message.sender.clone();
        let fingerprint = message.fingerprint.clone();
        self.registry
            .update(connection, move |r| {
                r.name = sender;
                if fingerprint.is_some() {
                    r.fingerprint = fingerprint;
                }
                r.liveness.record_activity(now);
            })
            .await;
        self.store.touch(&session).await;

        match Route::of(&message) {
            Route::Heartbeat => self.presence.record_heartbeat(connection).await?,
            Route::UserLeft => {
                self.broadcaster
                    .broadcast(&session, &message, Some(connection))
                    .await?;
                self.presence
                    .terminate(connection, DisconnectReason::UserLeft)
                    .await;
                return Ok(RouteOutcome::Close);
            }
            Route::Points(payload) => {
                self.points(connection, &session, &message, payload).await?
            }
            Route::ShowVotes => {
                let mut state = self.store.lock(&session).await;
                state.reveal(self.store.now());
                self.broadcaster.broadcast(&session, &message, None).await?;
            }
            Route::ClearVotes => {
                let mut state = self.store.lock(&session).await;
                state.clear_votes(self.store.now());
                self.broadcaster.broadcast(&session, &message, None).await?;
            }
            Route::RequestState => {
                tracing::info!(
                    session = %session,
                    connection = %connection,
                    name = %message.sender,
                    "client requesting state sync"
                );
                self.sync.send_state(connection, &session).await?;
            }
            Route::Description => {
                let description = message
                    .content
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let mut state = self.store.lock(&session).await;
                state.set_description(description, self.store.now());
                self.broadcaster.broadcast(&session, &message, None).await?;
            }
            Route::Timer(command) => self.timer(&session, &message, command).await?,
            Route::Echo => {
                self.broadcaster.broadcast(&session, &message, None).await?;
            }
        }
        Ok(RouteOutcome::Continue)
    }

    /// 同一指纹换了显示名时先广播 NAME_CHANGED
    async fn detect_name_change(
        &self,
        record: &ConnectionRecord,
        message: &WireMessage,
    ) -> Result<(), ApplicationError> {
        let (Some(stored), Some(incoming)) = (&record.fingerprint, &message.fingerprint) else {
            return Ok(());
        };
        if stored != incoming || record.name.is_empty() || record.name == message.sender {
            return Ok(());
        }

        tracing::info!(
            session = %record.session,
            fingerprint = %incoming,
            old_name = %record.name,
            new_name = %message.sender,
            "user changed name"
        );
        let notice = WireMessage::new(
            message.sender.clone(),
            Some(Content::text(message.sender.clone())),
            MessageType::NameChanged,
            self.store.now(),
        )
        .with_fingerprint(Some(incoming.clone()));
        self.broadcaster
            .broadcast(&record.session, &notice, None)
            .await?;
        Ok(())
    }

    async fn points(
        &self,
        connection: ConnectionId,
        session: &SessionId,
        message: &WireMessage,
        payload: PointsPayload,
    ) -> Result<(), ApplicationError> {
        match payload {
            PointsPayload::ClearVotesLegacy => {
                let mut state = self.store.lock(session).await;
                state.clear_votes(self.store.now());
                self.registry
                    .update_session(session, |r| {
                        let spectating = r
                            .last_known_vote
                            .as_ref()
                            .is_some_and(|vote| vote.is_text(DISCONNECT));
                        if !spectating {
                            r.last_known_vote = None;
                        }
                    })
                    .await;

                for record in self.registry.list_by_session(session).await {
                    let cleared = WireMessage::new(
                        record.display_name(),
                        None,
                        MessageType::Points,
                        self.store.now(),
                    )
                    .with_fingerprint(record.fingerprint.clone());
                    self.broadcaster.broadcast(session, &cleared, None).await?;
                }
            }
            PointsPayload::Spectate => {
                let record = self
                    .registry
                    .update(connection, |r| {
                        r.last_known_vote = Some(Content::text(DISCONNECT));
                        r.clone()
                    })
                    .await
                    .ok_or(ApplicationError::ConnectionNotFound(connection))?;
                let notice = WireMessage::new(
                    record.display_name(),
                    Some(Content::text(DISCONNECT)),
                    MessageType::Disconnect,
                    self.store.now(),
                )
                .with_fingerprint(record.fingerprint.clone());
                self.broadcaster.broadcast(session, &notice, None).await?;
            }
            PointsPayload::Empty => {
                let Some(fingerprint) = &message.fingerprint else {
                    return Ok(());
                };
                let state = self.store.lock(session).await;
                if state.votes_revealed() {
                    return Ok(());
                }
                let Some(restored) = state.vote(fingerprint).cloned() else {
                    return Ok(());
                };

                let vote = restored.clone();
                self.registry
                    .update(connection, move |r| r.last_known_vote = Some(vote))
                    .await;
                let replay = WireMessage::new(
                    message.sender.clone(),
                    Some(restored),
                    MessageType::Points,
                    self.store.now(),
                )
                .with_fingerprint(Some(fingerprint.clone()));
                self.broadcaster.broadcast(session, &replay, None).await?;
            }
            PointsPayload::Vote(vote) => {
                let mut state = self.store.lock(session).await;
                let remembered = vote.clone();
                self.registry
                    .update(connection, move |r| r.last_known_vote = Some(remembered))
                    .await;
                if let Some(fingerprint) = &message.fingerprint {
                    state.set_vote(fingerprint.clone(), Some(vote), self.store.now());
                }
                self.broadcaster.broadcast(session, message, None).await?;
            }
        }
        Ok(())
    }

    async fn timer(
        &self,
        session: &SessionId,
        message: &WireMessage,
        command: TimerCommand,
    ) -> Result<(), ApplicationError> {
        let mut state = self.store.lock(session).await;
        let now = self.store.now();
        match command {
            TimerCommand::Start { duration } => {
                state.start_timer(duration, now);
                self.timers.register(session.clone()).await;
            }
            TimerCommand::Pause => state.pause_timer(now),
            TimerCommand::Resume => {
                if state.resume_timer(now) {
                    self.timers.register(session.clone()).await;
                }
            }
            TimerCommand::Stop => {
                state.stop_timer(now);
                self.timers.unregister(session).await;
            }
            TimerCommand::Extend { seconds } => state.extend_timer(seconds, now),
        }
        self.broadcaster.broadcast(session, message, None).await?;
        Ok(())
    }
}
