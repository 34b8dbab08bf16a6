//! 本地会话镜像
//!
//! 按指纹（缺失时退回发送者名字）记录投票、显示名和活跃度。
//! 收到 STATE_SYNC 时整体替换，解析失败则保持原状。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use domain::{
    aggregate_votes, elapsed, has_consensus, Content, MessageType, PresenceStatus,
    SessionSnapshot, TimerCommand, TimerState, TimerStatus, Timestamp, WireMessage,
    TIMER_EXPIRED, UNKNOWN_SENDER,
};

/// 旧客户端的系统占位发送者
const LEGACY_SYSTEM_SENDER: &str = "NS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserActivity {
    pub last_active: Timestamp,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Default)]
pub struct SessionMirror {
    self_fingerprint: String,
    points: BTreeMap<String, Option<Content>>,
    names: BTreeMap<String, String>,
    activity: BTreeMap<String, UserActivity>,
    chat_log: Vec<WireMessage>,
    description: String,
    votes_revealed: bool,
    timer: TimerState,
}

impl SessionMirror {
    pub fn new(self_fingerprint: impl Into<String>) -> Self {
        Self {
            self_fingerprint: self_fingerprint.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, message: &WireMessage, now: Timestamp) {
        if message.sender == LEGACY_SYSTEM_SENDER {
            return;
        }

        if message.kind == MessageType::StateSync {
            match SessionSnapshot::from_content(message.content.as_ref()) {
                Ok(snapshot) => self.apply_snapshot(&snapshot, now),
                Err(err) => tracing::warn!(error = %err, "failed to apply state sync"),
            }
            return;
        }

        let key = message
            .fingerprint
            .as_ref()
            .map(|fp| fp.as_str().to_string())
            .unwrap_or_else(|| message.sender.clone());
        let at = Utc
            .timestamp_millis_opt(message.timestamp)
            .single()
            .filter(|_| message.timestamp > 0)
            .unwrap_or(now);

        // 服务器自己发出的消息不代表任何成员
        if message.sender != domain::SERVER_SENDER {
            self.names.insert(key.clone(), message.sender.clone());
            self.touch(&key, at);
        }

        match message.kind {
            MessageType::Disconnect | MessageType::UserLeft => {
                self.points.remove(&key);
                self.names.remove(&key);
                if let Some(activity) = self.activity.get_mut(&key) {
                    activity.status = PresenceStatus::Offline;
                }
            }
            MessageType::Points => {
                self.points.insert(key, message.content.clone());
            }
            MessageType::Chat => self.chat_log.push(message.clone()),
            MessageType::Join => {
                self.chat_log.push(message.clone());
                self.points.entry(key).or_insert(None);
            }
            MessageType::Description => {
                self.description = message
                    .content
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
            }
            MessageType::StatusAfk => self.set_status(&key, PresenceStatus::Afk, at),
            MessageType::StatusOnline => self.set_status(&key, PresenceStatus::Online, at),
            MessageType::StatusOffline => self.set_status(&key, PresenceStatus::Offline, at),
            MessageType::ShowVotes => {
                self.votes_revealed = true;
                if message
                    .content
                    .as_ref()
                    .is_some_and(|content| content.is_text(TIMER_EXPIRED))
                {
                    self.timer.remaining = 0;
                    self.timer.status = TimerStatus::Idle;
                }
            }
            MessageType::ClearVotes => {
                for vote in self.points.values_mut() {
                    *vote = None;
                }
                self.votes_revealed = false;
                self.timer.stop();
            }
            MessageType::TimerTick => {
                if let Some(remaining) = message.content.as_ref().and_then(Content::as_seconds) {
                    self.timer.remaining = remaining;
                    self.timer.status = if remaining > 0 {
                        TimerStatus::Running
                    } else {
                        TimerStatus::Idle
                    };
                }
            }
            MessageType::StartTimer
            | MessageType::PauseTimer
            | MessageType::ResumeTimer
            | MessageType::StopTimer
            | MessageType::ExtendTimer => {
                if let Some(command) =
                    TimerCommand::from_message(message.kind, message.content.as_ref())
                {
                    self.apply_timer(command, at);
                }
            }
            // 名字已在上面更新
            MessageType::NameChanged
            | MessageType::Heartbeat
            | MessageType::Action
            | MessageType::RequestState
            | MessageType::StateSync => {}
        }
    }

    /// 用服务器快照整体替换本地状态
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot, now: Timestamp) {
        self.points = snapshot
            .participants
            .iter()
            .map(|p| {
                let vote = snapshot.votes.get(&p.fingerprint).cloned().flatten();
                (p.fingerprint.as_str().to_string(), vote)
            })
            .collect();
        self.names = snapshot
            .participants
            .iter()
            .map(|p| (p.fingerprint.as_str().to_string(), p.name.clone()))
            .collect();

        let mut activity: BTreeMap<String, UserActivity> = snapshot
            .participants
            .iter()
            .map(|p| {
                (
                    p.fingerprint.as_str().to_string(),
                    UserActivity {
                        last_active: now,
                        status: PresenceStatus::Online,
                    },
                )
            })
            .collect();
        for (key, previous) in std::mem::take(&mut self.activity) {
            activity.entry(key).or_insert(previous);
        }
        self.activity = activity;

        self.description = snapshot.description.clone();
        self.votes_revealed = snapshot.votes_revealed;
        if let Some(timer) = &snapshot.timer {
            self.timer = timer.clone();
        }

        tracing::debug!(
            participants = snapshot.participants.len(),
            votes = snapshot.votes.len(),
            revealed = snapshot.votes_revealed,
            "state sync applied"
        );
    }

    /// 长时间没有动静的其他成员标记为离线，返回本次新标记的数量
    pub fn mark_stale_offline(&mut self, now: Timestamp, threshold: Duration) -> usize {
        let mut marked = 0;
        for (key, activity) in self.activity.iter_mut() {
            if *key == self.self_fingerprint || activity.status == PresenceStatus::Offline {
                continue;
            }
            if elapsed(now, activity.last_active) > threshold {
                activity.status = PresenceStatus::Offline;
                marked += 1;
            }
        }
        marked
    }

    pub fn points(&self) -> &BTreeMap<String, Option<Content>> {
        &self.points
    }

    pub fn vote_of(&self, key: &str) -> Option<&Content> {
        self.points.get(key).and_then(Option::as_ref)
    }

    pub fn display_name(&self, key: &str) -> &str {
        self.names.get(key).map(String::as_str).unwrap_or(UNKNOWN_SENDER)
    }

    pub fn activity(&self, key: &str) -> Option<&UserActivity> {
        self.activity.get(key)
    }

    pub fn chat_log(&self) -> &[WireMessage] {
        &self.chat_log
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn votes_revealed(&self) -> bool {
        self.votes_revealed
    }

    pub fn timer(&self) -> &TimerState {
        &self.timer
    }

    pub fn is_current_user(&self, key: &str) -> bool {
        key == self.self_fingerprint
    }

    pub fn vote_counts(&self) -> BTreeMap<String, usize> {
        aggregate_votes(self.points.values().map(Option::as_ref))
    }

    pub fn has_consensus(&self) -> bool {
        has_consensus(&self.vote_counts())
    }

    fn touch(&mut self, key: &str, at: Timestamp) {
        let entry = self
            .activity
            .entry(key.to_string())
            .or_insert(UserActivity {
                last_active: at,
                status: PresenceStatus::Online,
            });
        entry.last_active = at;
        if entry.status == PresenceStatus::Offline {
            entry.status = PresenceStatus::Online;
        }
    }

    fn set_status(&mut self, key: &str, status: PresenceStatus, at: Timestamp) {
        self.activity.insert(
            key.to_string(),
            UserActivity {
                last_active: at,
                status,
            },
        );
    }

    fn apply_timer(&mut self, command: TimerCommand, at: Timestamp) {
        match command {
            TimerCommand::Start { duration } => self.timer.start(duration, at),
            TimerCommand::Pause => self.timer.pause(at),
            TimerCommand::Resume => {
                self.timer.resume();
            }
            TimerCommand::Stop => self.timer.stop(),
            TimerCommand::Extend { seconds } => self.timer.extend(seconds),
        }
    }
}
