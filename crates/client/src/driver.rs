//! 异步驱动
//!
//! 单个任务独占 `ConnectionController`，把它给出的动作落到 tokio-tungstenite 上，
//! 同时处理心跳、重连计时、JOIN 延迟和本地状态巡检。

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use domain::{Content, MessageType, WireMessage, CLEAR_VOTES, SPECTATE};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::activity::{ActivityEvent, ActivityTracker};
use crate::controller::{ClientAction, ClientEvent, ClientSettings, ConnectionController};
use crate::error::ClientError;
use crate::heartbeat::{start_heartbeat, HeartbeatEmitter, HeartbeatReceiver, HeartbeatSender};
use crate::mirror::SessionMirror;
use crate::state::ConnectionState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectTask = JoinHandle<Result<Socket, ClientError>>;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send {
        kind: MessageType,
        content: Option<Content>,
    },
    Activity(ActivityEvent),
    Shutdown,
}

/// 会话客户端句柄
///
/// 所有发送都是即发即忘；未连接时消息进入离线队列，连上后按顺序补发。
pub struct SessionClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    mirror: Arc<RwLock<SessionMirror>>,
    task: JoinHandle<()>,
}

impl SessionClient {
    /// 启动驱动任务并立即开始连接
    pub fn connect(settings: ClientSettings) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mirror = Arc::new(RwLock::new(SessionMirror::new(settings.fingerprint.as_str())));

        let driver = Driver::new(settings, commands_rx, events_tx, state_tx, mirror.clone());
        let task = tokio::spawn(driver.run());

        let client = Self {
            commands: commands_tx,
            state: state_rx,
            mirror,
            task,
        };
        // 驱动任务刚启动，通道一定可用
        let _ = client.commands.send(Command::Connect);
        (client, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Stopped)
    }

    /// 本地镜像的一份拷贝
    pub async fn mirror(&self) -> SessionMirror {
        self.mirror.read().await.clone()
    }

    pub fn send(&self, kind: MessageType, content: Option<Content>) -> Result<(), ClientError> {
        self.command(Command::Send { kind, content })
    }

    pub fn vote(&self, value: impl Into<Content>) -> Result<(), ClientError> {
        self.send(MessageType::Points, Some(value.into()))
    }

    pub fn spectate(&self, spectating: bool) -> Result<(), ClientError> {
        let content = if spectating {
            Content::text(SPECTATE)
        } else {
            Content::number(0)
        };
        self.send(MessageType::Points, Some(content))
    }

    pub fn reveal(&self) -> Result<(), ClientError> {
        self.send(MessageType::ShowVotes, Some(Content::text("")))
    }

    /// 同时发送新旧两种清空指令，并清空描述
    pub fn clear_votes(&self) -> Result<(), ClientError> {
        self.send(MessageType::ClearVotes, Some(Content::text("")))?;
        self.send(MessageType::Description, Some(Content::text("")))?;
        self.send(MessageType::Points, Some(Content::text(CLEAR_VOTES)))
    }

    pub fn set_description(&self, description: impl Into<String>) -> Result<(), ClientError> {
        self.send(MessageType::Description, Some(Content::text(description)))
    }

    pub fn chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.send(MessageType::Chat, Some(Content::text(text)))
    }

    pub fn start_timer(&self, seconds: Option<u64>) -> Result<(), ClientError> {
        self.send(MessageType::StartTimer, seconds.map(Content::number))
    }

    pub fn pause_timer(&self) -> Result<(), ClientError> {
        self.send(MessageType::PauseTimer, None)
    }

    pub fn resume_timer(&self) -> Result<(), ClientError> {
        self.send(MessageType::ResumeTimer, None)
    }

    pub fn stop_timer(&self) -> Result<(), ClientError> {
        self.send(MessageType::StopTimer, None)
    }

    pub fn extend_timer(&self, seconds: Option<u64>) -> Result<(), ClientError> {
        self.send(MessageType::ExtendTimer, seconds.map(Content::number))
    }

    pub fn request_state(&self) -> Result<(), ClientError> {
        self.send(MessageType::RequestState, None)
    }

    pub fn record_activity(&self, event: ActivityEvent) -> Result<(), ClientError> {
        self.command(Command::Activity(event))
    }

    /// 重新连接；主动断开后需要调用它才会恢复
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    /// 通知其他成员离开，然后断开
    pub fn leave(&self) -> Result<(), ClientError> {
        self.send(MessageType::UserLeft, Some(Content::text("")))?;
        self.disconnect()
    }

    /// 断开并等待驱动任务退出
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "client task ended abnormally");
        }
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}

struct Driver {
    controller: ConnectionController,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    mirror: Arc<RwLock<SessionMirror>>,
    tracker: ActivityTracker,
    sink: Option<SplitSink<Socket, Message>>,
    stream: Option<SplitStream<Socket>>,
    connecting: Option<ConnectTask>,
    heartbeat: Option<Box<dyn HeartbeatEmitter>>,
    beats_tx: HeartbeatSender,
    beats_rx: HeartbeatReceiver,
    reconnect_at: Option<Instant>,
    join_at: Option<Instant>,
}

impl Driver {
    fn new(
        settings: ClientSettings,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ClientEvent>,
        state: watch::Sender<ConnectionState>,
        mirror: Arc<RwLock<SessionMirror>>,
    ) -> Self {
        let tracker =
            ActivityTracker::new(settings.afk_threshold, settings.activity_debounce, Utc::now());
        let (beats_tx, beats_rx) = mpsc::unbounded_channel();
        Self {
            controller: ConnectionController::new(settings),
            commands,
            events,
            state,
            mirror,
            tracker,
            sink: None,
            stream: None,
            connecting: None,
            heartbeat: None,
            beats_tx,
            beats_rx,
            reconnect_at: None,
            join_at: None,
        }
    }

    async fn run(mut self) {
        let mut status_check = tokio::time::interval(self.controller.settings().status_check_interval);
        status_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let actions = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        let actions = self.controller.disconnect();
                        self.execute(actions).await;
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                frame = next_frame(&mut self.stream) => self.handle_frame(frame).await,
                result = finish_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_finished(result)
                }
                Some(_) = self.beats_rx.recv() => {
                    self.controller.send(MessageType::Heartbeat, None, Utc::now())
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.controller.on_reconnect_due()
                }
                _ = wait_until(self.join_at) => {
                    self.join_at = None;
                    self.controller.on_join_due(Utc::now())
                }
                _ = status_check.tick() => self.check_status().await,
            };
            self.execute(actions).await;
        }

        tracing::debug!("session client stopped");
    }

    fn handle_command(&mut self, command: Command) -> Vec<ClientAction> {
        let now = Utc::now();
        match command {
            Command::Connect => self.controller.connect(),
            Command::Disconnect => self.controller.disconnect(),
            Command::Send { kind, content } => self.controller.send(kind, content, now),
            Command::Activity(event) => {
                if !self.tracker.record(event, now) {
                    return Vec::new();
                }
                match self.tracker.check(now) {
                    Some(kind) => self.controller.send(kind, None, now),
                    None => Vec::new(),
                }
            }
            // run 循环里已处理
            Command::Shutdown => Vec::new(),
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, WsError>>) -> Vec<ClientAction> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                match WireMessage::decode(text.as_str()) {
                    Ok(message) => {
                        self.mirror.write().await.apply(&message, Utc::now());
                        let _ = self.events.send(ClientEvent::Message(message));
                    }
                    Err(err) => tracing::warn!(error = %err, "dropping malformed server message"),
                }
                Vec::new()
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("websocket closed by server");
                self.drop_socket();
                self.controller.on_closed()
            }
            Some(Ok(_)) => Vec::new(),
            Some(Err(err)) => {
                self.drop_socket();
                self.controller.on_error(&err.to_string())
            }
        }
    }

    async fn check_status(&mut self) -> Vec<ClientAction> {
        let now = Utc::now();
        let threshold = self.controller.settings().offline_threshold;
        let marked = self.mirror.write().await.mark_stale_offline(now, threshold);
        if marked > 0 {
            tracing::debug!(marked, "peers marked offline");
        }
        match self.tracker.check(now) {
            Some(kind) => self.controller.send(kind, None, now),
            None => Vec::new(),
        }
    }

    async fn execute(&mut self, actions: Vec<ClientAction>) {
        let mut pending: VecDeque<ClientAction> = actions.into();
        while let Some(action) = pending.pop_front() {
            let follow_up = match action {
                ClientAction::Open => self.open(),
                ClientAction::Send(message) => self.write(message).await,
                ClientAction::StartHeartbeat => {
                    self.stop_heartbeat();
                    let interval = self.controller.settings().heartbeat_interval;
                    self.heartbeat = Some(start_heartbeat(interval, self.beats_tx.clone()));
                    Vec::new()
                }
                ClientAction::StopHeartbeat => {
                    self.stop_heartbeat();
                    Vec::new()
                }
                ClientAction::ScheduleJoin(delay) => {
                    self.join_at = Some(Instant::now() + delay);
                    Vec::new()
                }
                ClientAction::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                    Vec::new()
                }
                ClientAction::CancelTimers => {
                    self.reconnect_at = None;
                    self.join_at = None;
                    Vec::new()
                }
                ClientAction::Close => {
                    self.close().await;
                    Vec::new()
                }
                ClientAction::Emit(event) => {
                    if let ClientEvent::StateChanged(state) = &event {
                        self.state.send_replace(*state);
                    }
                    let _ = self.events.send(event);
                    Vec::new()
                }
            };
            // 后续动作先于同批剩余动作执行
            for action in follow_up.into_iter().rev() {
                pending.push_front(action);
            }
        }
    }

    /// 握手放到独立任务里，驱动循环在握手期间仍然处理命令
    fn open(&mut self) -> Vec<ClientAction> {
        self.abort_connect();
        let settings = self.controller.settings();
        let url = settings.url();
        let timeout = settings.connect_timeout;

        self.connecting = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((socket, _))) => Ok(socket),
                Ok(Err(err)) => Err(ClientError::from(err)),
                Err(_) => Err(ClientError::ConnectTimeout),
            }
        }));
        Vec::new()
    }

    fn on_connect_finished(
        &mut self,
        result: Result<Result<Socket, ClientError>, JoinError>,
    ) -> Vec<ClientAction> {
        match result {
            Ok(Ok(socket)) => {
                tracing::info!(url = %self.controller.settings().url(), "websocket connected");
                let (sink, stream) = socket.split();
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.controller.on_open(Utc::now())
            }
            Ok(Err(err)) => self.controller.on_error(&err.to_string()),
            Err(err) => self.controller.on_error(&err.to_string()),
        }
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
            tracing::debug!("pending websocket handshake cancelled");
        }
    }

    async fn write(&mut self, message: WireMessage) -> Vec<ClientAction> {
        let Some(sink) = self.sink.as_mut() else {
            return self.controller.submit(message);
        };
        let text = match message.encode() {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, kind = %message.kind, "failed to encode message");
                return Vec::new();
            }
        };

        match sink.send(Message::Text(text.into())).await {
            Ok(()) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, kind = %message.kind, "failed to send message");
                self.drop_socket();
                self.controller.on_send_failed(message)
            }
        }
    }

    async fn close(&mut self) {
        self.abort_connect();
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                tracing::debug!(error = %err, "websocket close failed");
            }
        }
        self.stream = None;
    }

    fn drop_socket(&mut self) {
        self.sink = None;
        self.stream = None;
    }

    fn stop_heartbeat(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }
}

async fn next_frame(stream: &mut Option<SplitStream<Socket>>) -> Option<Result<Message, WsError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn finish_connect(
    task: &mut Option<ConnectTask>,
) -> Result<Result<Socket, ClientError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
