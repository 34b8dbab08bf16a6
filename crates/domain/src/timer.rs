use serde::{Deserialize, Serialize};

use crate::value_objects::Timestamp;

/// 计时器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// 会话倒计时
///
/// 剩余时间只由服务器的秒级 tick 递减，暂停/恢复不会根据墙钟重新计算。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub duration: u64,
    pub remaining: u64,
    pub status: TimerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<Timestamp>,
}

/// 一次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub remaining: u64,
    /// 只在归零的那一次 tick 为 true
    pub expired: bool,
}

impl TimerState {
    pub fn is_running(&self) -> bool {
        self.status == TimerStatus::Running
    }

    pub fn start(&mut self, duration: u64, now: Timestamp) {
        self.duration = duration;
        self.remaining = duration;
        self.status = TimerStatus::Running;
        self.started_at = Some(now);
        self.paused_at = None;
    }

    /// 非运行状态下为空操作
    pub fn pause(&mut self, now: Timestamp) {
        if self.status == TimerStatus::Running {
            self.status = TimerStatus::Paused;
            self.paused_at = Some(now);
        }
    }

    /// 只能从暂停状态恢复；返回是否真的恢复了
    pub fn resume(&mut self) -> bool {
        if self.status != TimerStatus::Paused {
            return false;
        }
        self.status = TimerStatus::Running;
        self.paused_at = None;
        true
    }

    pub fn stop(&mut self) {
        *self = TimerState::default();
    }

    /// 无论当前状态都延长
    pub fn extend(&mut self, seconds: u64) {
        self.duration = self.duration.saturating_add(seconds);
        self.remaining = self.remaining.saturating_add(seconds);
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.status != TimerStatus::Running {
            return TickOutcome {
                remaining: self.remaining,
                expired: false,
            };
        }

        self.remaining = self.remaining.saturating_sub(1);
        let expired = self.remaining == 0;
        if expired {
            self.status = TimerStatus::Idle;
            self.started_at = None;
        }
        TickOutcome {
            remaining: self.remaining,
            expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn sixty_ticks_expire_exactly_once() {
        let mut timer = TimerState::default();
        timer.start(60, Utc::now());

        for i in 1..=59 {
            let outcome = timer.tick();
            assert!(!outcome.expired, "tick {i} should not expire");
            assert_eq!(outcome.remaining, 60 - i);
        }

        let last = timer.tick();
        assert!(last.expired);
        assert_eq!(last.remaining, 0);
        assert_eq!(timer.status, TimerStatus::Idle);

        let after = timer.tick();
        assert!(!after.expired);
        assert_eq!(after.remaining, 0);
    }

    #[test]
    fn pause_only_applies_to_running_timer() {
        let mut timer = TimerState::default();
        timer.pause(Utc::now());
        assert_eq!(timer.status, TimerStatus::Idle);
        assert!(timer.paused_at.is_none());

        timer.start(10, Utc::now());
        timer.pause(Utc::now());
        assert_eq!(timer.status, TimerStatus::Paused);
        assert!(timer.paused_at.is_some());

        let outcome = timer.tick();
        assert_eq!(outcome.remaining, 10);
    }

    #[test]
    fn resume_continues_from_paused_remaining() {
        let mut timer = TimerState::default();
        timer.start(10, Utc::now());
        timer.tick();
        timer.tick();
        timer.pause(Utc::now());

        assert!(timer.resume());
        assert_eq!(timer.status, TimerStatus::Running);
        assert_eq!(timer.remaining, 8);
        assert!(timer.paused_at.is_none());
        assert!(!timer.resume());
    }

    #[test]
    fn extend_while_paused_keeps_status() {
        let mut timer = TimerState::default();
        timer.start(60, Utc::now());
        timer.tick();
        timer.pause(Utc::now());
        timer.extend(30);

        assert_eq!(timer.duration, 90);
        assert_eq!(timer.remaining, 89);
        assert_eq!(timer.status, TimerStatus::Paused);
    }

    #[test]
    fn stop_resets_everything() {
        let mut timer = TimerState::default();
        timer.start(60, Utc::now());
        timer.stop();
        assert_eq!(timer, TimerState::default());
    }
}
