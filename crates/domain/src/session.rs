use std::collections::BTreeMap;

use crate::message::Content;
use crate::timer::{TickOutcome, TimerState};
use crate::value_objects::{Fingerprint, Timestamp};

/// 单个会话的权威状态
///
/// 会话在第一次被访问时创建，只会被后台清理任务按最后活跃时间回收。
/// 所有修改操作都会刷新 `last_activity`。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    votes: BTreeMap<Fingerprint, Option<Content>>,
    votes_revealed: bool,
    description: String,
    timer: TimerState,
    last_activity: Timestamp,
}

impl SessionState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            votes: BTreeMap::new(),
            votes_revealed: false,
            description: String::new(),
            timer: TimerState::default(),
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity = now;
    }

    pub fn last_activity(&self) -> Timestamp {
        self.last_activity
    }

    pub fn set_vote(&mut self, fingerprint: Fingerprint, vote: Option<Content>, now: Timestamp) {
        self.votes.insert(fingerprint, vote);
        self.touch(now);
    }

    /// 未投票与“投了空票”都返回 None
    pub fn vote(&self, fingerprint: &Fingerprint) -> Option<&Content> {
        self.votes.get(fingerprint).and_then(Option::as_ref)
    }

    pub fn votes(&self) -> &BTreeMap<Fingerprint, Option<Content>> {
        &self.votes
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// 幂等
    pub fn reveal(&mut self, now: Timestamp) {
        self.votes_revealed = true;
        self.touch(now);
    }

    pub fn votes_revealed(&self) -> bool {
        self.votes_revealed
    }

    /// 清空投票、取消亮牌并把计时器复位
    pub fn clear_votes(&mut self, now: Timestamp) {
        self.votes.clear();
        self.votes_revealed = false;
        self.timer.stop();
        self.touch(now);
    }

    pub fn set_description(&mut self, description: impl Into<String>, now: Timestamp) {
        self.description = description.into();
        self.touch(now);
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timer(&self) -> &TimerState {
        &self.timer
    }

    pub fn start_timer(&mut self, duration: u64, now: Timestamp) {
        self.timer.start(duration, now);
        self.touch(now);
    }

    pub fn pause_timer(&mut self, now: Timestamp) {
        self.timer.pause(now);
        self.touch(now);
    }

    pub fn resume_timer(&mut self, now: Timestamp) -> bool {
        let resumed = self.timer.resume();
        self.touch(now);
        resumed
    }

    pub fn stop_timer(&mut self, now: Timestamp) {
        self.timer.stop();
        self.touch(now);
    }

    pub fn extend_timer(&mut self, seconds: u64, now: Timestamp) {
        self.timer.extend(seconds);
        self.touch(now);
    }

    pub fn tick(&mut self, now: Timestamp) -> TickOutcome {
        let outcome = self.timer.tick();
        self.touch(now);
        outcome
    }
}
