//! 本地活跃度判定
//!
//! 宿主界面把指针、键盘、焦点、可见性事件喂进来，
//! 超过 `afk_threshold` 没有活动即视为 AFK。只有状态变化时才需要上报。

use std::time::Duration;

use domain::{elapsed, MessageType, PresenceStatus, Timestamp};

pub const DEFAULT_AFK_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_ACTIVITY_DEBOUNCE: Duration = Duration::from_secs(1);
pub const DEFAULT_STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_OFFLINE_THRESHOLD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    Pointer,
    Keyboard,
    Focus,
    Visibility,
}

#[derive(Debug, Clone)]
pub struct ActivityTracker {
    afk_threshold: Duration,
    debounce: Duration,
    last_activity: Timestamp,
    reported: PresenceStatus,
}

impl ActivityTracker {
    pub fn new(afk_threshold: Duration, debounce: Duration, now: Timestamp) -> Self {
        Self {
            afk_threshold,
            debounce,
            last_activity: now,
            reported: PresenceStatus::Online,
        }
    }

    /// 记录一次活动；去抖窗口内的重复事件被忽略，返回是否生效
    pub fn record(&mut self, event: ActivityEvent, now: Timestamp) -> bool {
        if self.reported == PresenceStatus::Online
            && elapsed(now, self.last_activity) < self.debounce
        {
            return false;
        }
        tracing::trace!(?event, "activity recorded");
        self.last_activity = now;
        true
    }

    pub fn status(&self, now: Timestamp) -> PresenceStatus {
        if elapsed(now, self.last_activity) < self.afk_threshold {
            PresenceStatus::Online
        } else {
            PresenceStatus::Afk
        }
    }

    /// 状态与上次上报不同时返回需要发送的消息类型
    pub fn check(&mut self, now: Timestamp) -> Option<MessageType> {
        let status = self.status(now);
        if status == self.reported {
            return None;
        }
        self.reported = status;
        match status {
            PresenceStatus::Afk => Some(MessageType::StatusAfk),
            _ => Some(MessageType::StatusOnline),
        }
    }

    pub fn reported(&self) -> PresenceStatus {
        self.reported
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(
            DEFAULT_AFK_THRESHOLD,
            DEFAULT_ACTIVITY_DEBOUNCE,
            chrono::Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn goes_afk_after_threshold_and_reports_once() {
        let mut tracker = ActivityTracker::new(DEFAULT_AFK_THRESHOLD, DEFAULT_ACTIVITY_DEBOUNCE, at(0));
        assert_eq!(tracker.check(at(60)), None);
        assert_eq!(tracker.check(at(120)), Some(MessageType::StatusAfk));
        assert_eq!(tracker.check(at(130)), None);

        assert!(tracker.record(ActivityEvent::Keyboard, at(131)));
        assert_eq!(tracker.check(at(131)), Some(MessageType::StatusOnline));
        assert_eq!(tracker.reported(), PresenceStatus::Online);
    }

    #[test]
    fn bursts_inside_debounce_window_are_ignored() {
        let mut tracker = ActivityTracker::new(DEFAULT_AFK_THRESHOLD, DEFAULT_ACTIVITY_DEBOUNCE, at(0));
        assert!(tracker.record(ActivityEvent::Pointer, at(5)));
        let burst = at(5) + chrono::Duration::milliseconds(300);
        assert!(!tracker.record(ActivityEvent::Pointer, burst));
        assert!(tracker.record(ActivityEvent::Focus, at(7)));
    }

    #[test]
    fn first_event_after_afk_is_never_debounced() {
        let mut tracker = ActivityTracker::new(
            Duration::from_secs(2),
            Duration::from_secs(10),
            at(0),
        );
        assert_eq!(tracker.check(at(3)), Some(MessageType::StatusAfk));
        assert!(tracker.record(ActivityEvent::Visibility, at(4)));
        assert_eq!(tracker.check(at(4)), Some(MessageType::StatusOnline));
    }
}
