//! 连接状态机
//!
//! 不做 IO：每个输入事件返回一组 `ClientAction`，由驱动任务按顺序执行。

use std::time::Duration;

use domain::{Content, Fingerprint, MessageType, Timestamp, WireMessage, JOINED};

use crate::activity::{
    DEFAULT_ACTIVITY_DEBOUNCE, DEFAULT_AFK_THRESHOLD, DEFAULT_OFFLINE_THRESHOLD,
    DEFAULT_STATUS_CHECK_INTERVAL,
};
use crate::backoff::ReconnectPolicy;
use crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
use crate::state::ConnectionState;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// 例如 `ws://127.0.0.1:4000`
    pub server_url: String,
    pub session: String,
    pub name: String,
    pub fingerprint: Fingerprint,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub join_announce_delay: Duration,
    pub status_check_interval: Duration,
    pub afk_threshold: Duration,
    pub activity_debounce: Duration,
    pub offline_threshold: Duration,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
}

impl ClientSettings {
    pub fn new(
        server_url: impl Into<String>,
        session: impl Into<String>,
        name: impl Into<String>,
        fingerprint: impl Into<Fingerprint>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            session: session.into(),
            name: name.into(),
            fingerprint: fingerprint.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            join_announce_delay: Duration::from_secs(1),
            status_check_interval: DEFAULT_STATUS_CHECK_INTERVAL,
            afk_threshold: DEFAULT_AFK_THRESHOLD,
            activity_debounce: DEFAULT_ACTIVITY_DEBOUNCE,
            offline_threshold: DEFAULT_OFFLINE_THRESHOLD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self) -> String {
        let session: String = url::form_urlencoded::byte_serialize(self.session.as_bytes()).collect();
        format!("{}/?session={}", self.server_url.trim_end_matches('/'), session)
    }
}

/// 对外通知
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    Message(WireMessage),
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    Open,
    Send(WireMessage),
    StartHeartbeat,
    StopHeartbeat,
    ScheduleJoin(Duration),
    ScheduleReconnect(Duration),
    /// 取消尚未触发的重连和 JOIN
    CancelTimers,
    Close,
    Emit(ClientEvent),
}

pub struct ConnectionController {
    settings: ClientSettings,
    state: ConnectionState,
    attempts: u32,
    queue: OutboundQueue,
}

impl ConnectionController {
    pub fn new(settings: ClientSettings) -> Self {
        let queue = OutboundQueue::with_capacity(settings.queue_capacity);
        Self {
            settings,
            state: ConnectionState::Disconnected,
            attempts: 0,
            queue,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 以当前身份构造一条消息
    pub fn message(&self, kind: MessageType, content: Option<Content>, now: Timestamp) -> WireMessage {
        WireMessage::new(self.settings.name.clone(), content, kind, now)
            .with_session(self.settings.session.clone())
            .with_fingerprint(Some(self.settings.fingerprint.clone()))
    }

    pub fn connect(&mut self) -> Vec<ClientAction> {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Vec::new();
        }
        self.attempts = 0;
        let mut actions = vec![ClientAction::CancelTimers];
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(ClientAction::Open);
        actions
    }

    pub fn on_open(&mut self, now: Timestamp) -> Vec<ClientAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.transition(ConnectionState::Connected, &mut actions);
        self.attempts = 0;

        actions.push(ClientAction::Send(self.message(MessageType::Points, None, now)));
        actions.push(ClientAction::Send(self.message(MessageType::RequestState, None, now)));
        let queued = self.queue.len();
        actions.extend(self.queue.drain().map(ClientAction::Send));
        if queued > 0 {
            tracing::info!(queued, "flushing queued messages");
        }
        actions.push(ClientAction::StartHeartbeat);
        actions.push(ClientAction::ScheduleJoin(self.settings.join_announce_delay));
        actions
    }

    pub fn on_join_due(&mut self, now: Timestamp) -> Vec<ClientAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        vec![ClientAction::Send(self.message(
            MessageType::Join,
            Some(Content::text(JOINED)),
            now,
        ))]
    }

    /// 已连接时直接发送，否则进入队列（心跳直接丢弃）
    pub fn send(&mut self, kind: MessageType, content: Option<Content>, now: Timestamp) -> Vec<ClientAction> {
        let message = self.message(kind, content, now);
        self.submit(message)
    }

    pub fn submit(&mut self, message: WireMessage) -> Vec<ClientAction> {
        if self.state == ConnectionState::Connected {
            return vec![ClientAction::Send(message)];
        }
        if message.kind != MessageType::Heartbeat {
            tracing::debug!(kind = %message.kind, state = %self.state, "not connected, queueing message");
        }
        if let Some(dropped) = self.queue.push(message) {
            tracing::warn!(kind = %dropped.kind, "message queue full, dropped oldest message");
        }
        Vec::new()
    }

    /// 发送失败：消息放回队首，按连接丢失处理
    pub fn on_send_failed(&mut self, message: WireMessage) -> Vec<ClientAction> {
        self.queue.requeue_front(message);
        self.on_connection_lost()
    }

    pub fn on_closed(&mut self) -> Vec<ClientAction> {
        self.on_connection_lost()
    }

    pub fn on_error(&mut self, error: &str) -> Vec<ClientAction> {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::warn!(error, attempts = self.attempts, "websocket connection failed");
        }
        self.on_connection_lost()
    }

    pub fn on_reconnect_due(&mut self) -> Vec<ClientAction> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(ClientAction::Open);
        actions
    }

    /// 主动断开：停止一切后台动作，直到再次调用 `connect`
    pub fn disconnect(&mut self) -> Vec<ClientAction> {
        let mut actions = vec![
            ClientAction::CancelTimers,
            ClientAction::StopHeartbeat,
            ClientAction::Close,
        ];
        self.queue.clear();
        self.attempts = 0;
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    fn on_connection_lost(&mut self) -> Vec<ClientAction> {
        // 主动断开、已在等待重连或已放弃时不再处理
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Vec::new();
        }

        let mut actions = vec![ClientAction::StopHeartbeat];
        self.transition(ConnectionState::Error, &mut actions);

        let next = self.attempts + 1;
        if !self.settings.reconnect.allows(next) {
            tracing::error!(attempts = self.attempts, "giving up reconnecting");
            actions.push(ClientAction::Emit(ClientEvent::ReconnectExhausted {
                attempts: self.attempts,
            }));
            return actions;
        }

        self.attempts = next;
        let delay = self.settings.reconnect.delay_for(next);
        tracing::info!(
            attempt = next,
            max_attempts = self.settings.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.transition(ConnectionState::Reconnecting, &mut actions);
        actions.push(ClientAction::ScheduleReconnect(delay));
        actions
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<ClientAction>) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        actions.push(ClientAction::Emit(ClientEvent::StateChanged(next)));
    }
}
