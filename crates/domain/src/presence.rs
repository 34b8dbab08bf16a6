//! 在线状态与连接存活判定
//!
//! 服务器同时维护两条独立的判定路径：
//! - 传输层存活：ping/pong 两轮协议，错过一整轮才会断开；
//! - 应用层心跳：连续错过若干次心跳后标记为离线（连接仍保留），
//!   离线超过一定时间后才真正移除。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::{DISCONNECT, TIMEOUT};
use crate::value_objects::{elapsed, Timestamp};

/// 三态在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Afk,
    Offline,
}

/// 存活判定参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
    pub inactivity_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub missed_heartbeat_threshold: u32,
    pub offline_removal_timeout: Duration,
}

impl PresencePolicy {
    /// 超过 1.5 倍心跳间隔没有收到心跳才算错过一次
    pub fn heartbeat_grace(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_interval / 2
    }
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(60 * 60),
            heartbeat_interval: Duration::from_secs(15),
            missed_heartbeat_threshold: 3,
            offline_removal_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// 连接被关闭的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 一整轮 ping 没有收到 pong
    NoPong,
    /// 长时间没有任何消息
    InactivityTimeout,
    /// 离线状态持续过久
    OfflineExpired,
    /// 读写出错
    TransportError,
    /// 对端正常关闭
    Closed,
    /// 客户端发送 USER_LEFT
    UserLeft,
}

impl DisconnectReason {
    /// 广播给会话其它成员的 DISCONNECT 内容
    pub fn broadcast_content(&self) -> &'static str {
        match self {
            DisconnectReason::InactivityTimeout => TIMEOUT,
            _ => DISCONNECT,
        }
    }

    /// 对端主动关闭或已发送 USER_LEFT 时无需再广播 DISCONNECT
    pub fn announces(&self) -> bool {
        !matches!(self, DisconnectReason::Closed | DisconnectReason::UserLeft)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::NoPong => "no_pong",
            DisconnectReason::InactivityTimeout => "inactivity_timeout",
            DisconnectReason::OfflineExpired => "offline_expired",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::Closed => "closed",
            DisconnectReason::UserLeft => "user_left",
        }
    }
}

/// 一次巡检对单个连接的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// 关闭连接并广播 DISCONNECT
    Terminate(DisconnectReason),
    /// 刚刚被判定为离线：广播 STATUS_OFFLINE，然后照常 ping
    WentOffline,
    /// 发送 ping
    Ping,
}

/// 连接上的存活记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub is_alive: bool,
    pub last_activity: Timestamp,
    pub last_heartbeat: Timestamp,
    pub missed_heartbeats: u32,
    pub offline_since: Option<Timestamp>,
}

impl Liveness {
    pub fn new(now: Timestamp) -> Self {
        Self {
            is_alive: true,
            last_activity: now,
            last_heartbeat: now,
            missed_heartbeats: 0,
            offline_since: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline_since.is_some()
    }

    pub fn record_pong(&mut self) {
        self.is_alive = true;
    }

    pub fn record_activity(&mut self, now: Timestamp) {
        self.last_activity = now;
    }

    /// 处理应用层心跳，返回之前是否处于离线状态
    pub fn record_heartbeat(&mut self, now: Timestamp) -> bool {
        let was_offline = self.is_offline();
        self.missed_heartbeats = 0;
        self.last_heartbeat = now;
        self.last_activity = now;
        self.is_alive = true;
        self.offline_since = None;
        was_offline
    }

    /// 巡检顺序：传输存活 → 无活动超时 → 离线驱逐 → 心跳计数 → ping
    pub fn evaluate(&mut self, policy: &PresencePolicy, now: Timestamp) -> LivenessVerdict {
        if !self.is_alive {
            return LivenessVerdict::Terminate(DisconnectReason::NoPong);
        }

        if elapsed(now, self.last_activity) > policy.inactivity_timeout {
            return LivenessVerdict::Terminate(DisconnectReason::InactivityTimeout);
        }

        if let Some(since) = self.offline_since {
            if elapsed(now, since) > policy.offline_removal_timeout {
                return LivenessVerdict::Terminate(DisconnectReason::OfflineExpired);
            }
        }

        let mut went_offline = false;
        if elapsed(now, self.last_heartbeat) > policy.heartbeat_grace() {
            self.missed_heartbeats = self.missed_heartbeats.saturating_add(1);
            if self.missed_heartbeats >= policy.missed_heartbeat_threshold && !self.is_offline() {
                self.offline_since = Some(now);
                went_offline = true;
            }
        }

        self.is_alive = false;
        if went_offline {
            LivenessVerdict::WentOffline
        } else {
            LivenessVerdict::Ping
        }
    }
}
