//! 线上消息模型
//!
//! 所有客户端与服务器之间交换的消息都是同一种 JSON 对象：
//! `{sender, content?, type, timestamp, session?, fingerprint?}`。
//! 旧客户端把控制语义塞进了 `content` 字符串里（例如 `"ClearVotes"`），
//! 这些哨兵值在这里统一解码成显式的枚举，业务层不再比较字符串。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Fingerprint, Timestamp};

/// 服务器发出的消息使用的发送者名称
pub const SERVER_SENDER: &str = "server";
/// 连接还没有显示名时使用的名称
pub const UNKNOWN_SENDER: &str = "Unknown";

/// 旧版清空投票：POINTS 消息携带此内容
pub const CLEAR_VOTES: &str = "ClearVotes";
/// 切换为旁观者：POINTS 消息携带此内容
pub const SPECTATE: &str = "spectate";
/// 旁观/断开标记，同时也是连接上保存的旁观状态
pub const DISCONNECT: &str = "disconnect";
/// 因长时间无活动被断开
pub const TIMEOUT: &str = "timeout";
/// 计时器到期自动亮牌
pub const TIMER_EXPIRED: &str = "timer_expired";
/// 新加入者收到的“已亮牌”提示
pub const VOTES_REVEALED: &str = "votes_revealed";
/// 加入会话的广播内容
pub const JOINED: &str = "has joined the session";

/// START_TIMER 未携带数值时的默认时长（秒）
pub const DEFAULT_TIMER_DURATION: u64 = 60;
/// EXTEND_TIMER 未携带数值时的默认延长秒数
pub const DEFAULT_TIMER_EXTENSION: u64 = 30;

/// 消息类型，线上格式为 snake_case 字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    Points,
    Action,
    Disconnect,
    Description,
    Heartbeat,
    Join,
    StatusAfk,
    StatusOnline,
    StatusOffline,
    UserLeft,
    NameChanged,
    ShowVotes,
    ClearVotes,
    RequestState,
    StateSync,
    StartTimer,
    PauseTimer,
    ResumeTimer,
    StopTimer,
    ExtendTimer,
    TimerTick,
}

impl MessageType {
    pub const ALL: [MessageType; 22] = [
        MessageType::Chat,
        MessageType::Points,
        MessageType::Action,
        MessageType::Disconnect,
        MessageType::Description,
        MessageType::Heartbeat,
        MessageType::Join,
        MessageType::StatusAfk,
        MessageType::StatusOnline,
        MessageType::StatusOffline,
        MessageType::UserLeft,
        MessageType::NameChanged,
        MessageType::ShowVotes,
        MessageType::ClearVotes,
        MessageType::RequestState,
        MessageType::StateSync,
        MessageType::StartTimer,
        MessageType::PauseTimer,
        MessageType::ResumeTimer,
        MessageType::StopTimer,
        MessageType::ExtendTimer,
        MessageType::TimerTick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::Points => "points",
            MessageType::Action => "action",
            MessageType::Disconnect => "disconnect",
            MessageType::Description => "description",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Join => "join",
            MessageType::StatusAfk => "status_afk",
            MessageType::StatusOnline => "status_online",
            MessageType::StatusOffline => "status_offline",
            MessageType::UserLeft => "user_left",
            MessageType::NameChanged => "name_changed",
            MessageType::ShowVotes => "show_votes",
            MessageType::ClearVotes => "clear_votes",
            MessageType::RequestState => "request_state",
            MessageType::StateSync => "state_sync",
            MessageType::StartTimer => "start_timer",
            MessageType::PauseTimer => "pause_timer",
            MessageType::ResumeTimer => "resume_timer",
            MessageType::StopTimer => "stop_timer",
            MessageType::ExtendTimer => "extend_timer",
            MessageType::TimerTick => "timer_tick",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息内容：字符串或数字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Number(serde_json::Number),
    Text(String),
}

impl Content {
    pub fn text(value: impl Into<String>) -> Self {
        Content::Text(value.into())
    }

    pub fn number(value: u64) -> Self {
        Content::Number(serde_json::Number::from(value))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Number(_) => None,
        }
    }

    pub fn is_text(&self, expected: &str) -> bool {
        self.as_text() == Some(expected)
    }

    /// 非负数值向下取整成秒数；负数、非数字返回 None。
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            Content::Number(number) => {
                if let Some(value) = number.as_u64() {
                    return Some(value);
                }
                number
                    .as_f64()
                    .filter(|value| value.is_finite() && *value >= 0.0)
                    .map(|value| value as u64)
            }
            Content::Text(_) => None,
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Number(number) => write!(f, "{number}"),
            Content::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<u64> for Content {
    fn from(value: u64) -> Self {
        Content::number(value)
    }
}

/// 线上消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// 毫秒时间戳
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl WireMessage {
    pub fn new(
        sender: impl Into<String>,
        content: Option<Content>,
        kind: MessageType,
        at: Timestamp,
    ) -> Self {
        Self {
            sender: sender.into(),
            content,
            kind,
            timestamp: at.timestamp_millis(),
            session: None,
            fingerprint: None,
        }
    }

    /// 服务器生成的消息
    pub fn server(kind: MessageType, content: Option<Content>, at: Timestamp) -> Self {
        Self::new(SERVER_SENDER, content, kind, at)
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// 解析一条入站文本帧
    pub fn decode(text: &str) -> DomainResult<Self> {
        serde_json::from_str(text).map_err(|err| DomainError::malformed(err.to_string()))
    }

    pub fn encode(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|err| DomainError::serialization(err.to_string()))
    }
}

/// POINTS 消息内容的解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum PointsPayload {
    /// 普通投票
    Vote(Content),
    /// 旧版清空投票指令
    ClearVotesLegacy,
    /// 切换为旁观者
    Spectate,
    /// 无内容：身份声明，或者重连后请求恢复投票
    Empty,
}

impl PointsPayload {
    pub fn from_content(content: Option<&Content>) -> Self {
        match content {
            None => PointsPayload::Empty,
            Some(content) if content.is_text(CLEAR_VOTES) => PointsPayload::ClearVotesLegacy,
            Some(content) if content.is_text(SPECTATE) => PointsPayload::Spectate,
            Some(content) => PointsPayload::Vote(content.clone()),
        }
    }
}

/// 计时器控制指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start { duration: u64 },
    Pause,
    Resume,
    Stop,
    Extend { seconds: u64 },
}

impl TimerCommand {
    /// 非计时器消息返回 None
    pub fn from_message(kind: MessageType, content: Option<&Content>) -> Option<Self> {
        let seconds = content.and_then(Content::as_seconds);
        match kind {
            MessageType::StartTimer => Some(TimerCommand::Start {
                duration: seconds.unwrap_or(DEFAULT_TIMER_DURATION),
            }),
            MessageType::PauseTimer => Some(TimerCommand::Pause),
            MessageType::ResumeTimer => Some(TimerCommand::Resume),
            MessageType::StopTimer => Some(TimerCommand::Stop),
            MessageType::ExtendTimer => Some(TimerCommand::Extend {
                seconds: seconds.unwrap_or(DEFAULT_TIMER_EXTENSION),
            }),
            _ => None,
        }
    }
}
