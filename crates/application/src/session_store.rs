//! 会话状态存储
//!
//! 每个会话一把 `tokio::sync::Mutex`。单个操作内部加锁；
//! 需要“读-改-广播”原子完成的调用方用 [`SessionStore::lock`] 拿到整段独占。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use domain::{
    elapsed, Content, Fingerprint, SessionId, SessionState, TickOutcome, TimerState,
};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::clock::Clock;

/// 存储统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_votes: usize,
    pub revealed_sessions: usize,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// 取会话条目，不存在则创建
    async fn entry(&self, session: &SessionId) -> Arc<Mutex<SessionState>> {
        if let Some(existing) = self.sessions.read().await.get(session) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(self.clock.now()))))
            .clone()
    }

    async fn existing(&self, session: &SessionId) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().await.get(session).cloned()
    }

    /// 独占会话状态，直到 guard 被释放
    pub async fn lock(&self, session: &SessionId) -> OwnedMutexGuard<SessionState> {
        self.entry(session).await.lock_owned().await
    }

    pub fn now(&self) -> domain::Timestamp {
        self.clock.now()
    }

    pub async fn contains(&self, session: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    pub async fn touch(&self, session: &SessionId) {
        let now = self.clock.now();
        self.lock(session).await.touch(now);
    }

    pub async fn set_vote(&self, session: &SessionId, fingerprint: Fingerprint, vote: Option<Content>) {
        let now = self.clock.now();
        self.lock(session).await.set_vote(fingerprint, vote, now);
    }

    pub async fn get_vote(&self, session: &SessionId, fingerprint: &Fingerprint) -> Option<Content> {
        let entry = self.existing(session).await?;
        let state = entry.lock().await;
        state.vote(fingerprint).cloned()
    }

    pub async fn get_all_votes(&self, session: &SessionId) -> BTreeMap<Fingerprint, Option<Content>> {
        match self.existing(session).await {
            Some(entry) => entry.lock().await.votes().clone(),
            None => BTreeMap::new(),
        }
    }

    pub async fn reveal_votes(&self, session: &SessionId) {
        let now = self.clock.now();
        self.lock(session).await.reveal(now);
    }

    pub async fn are_votes_revealed(&self, session: &SessionId) -> bool {
        match self.existing(session).await {
            Some(entry) => entry.lock().await.votes_revealed(),
            None => false,
        }
    }

    /// 同时复位计时器
    pub async fn clear_votes(&self, session: &SessionId) {
        let now = self.clock.now();
        self.lock(session).await.clear_votes(now);
    }

    pub async fn set_description(&self, session: &SessionId, description: impl Into<String>) {
        let now = self.clock.now();
        self.lock(session).await.set_description(description, now);
    }

    pub async fn get_description(&self, session: &SessionId) -> String {
        match self.existing(session).await {
            Some(entry) => entry.lock().await.description().to_string(),
            None => String::new(),
        }
    }

    pub async fn start_timer(&self, session: &SessionId, duration: u64) {
        let now = self.clock.now();
        self.lock(session).await.start_timer(duration, now);
    }

    pub async fn pause_timer(&self, session: &SessionId) {
        let now = self.clock.now();
        self.lock(session).await.pause_timer(now);
    }

    pub async fn resume_timer(&self, session: &SessionId) -> bool {
        let now = self.clock.now();
        self.lock(session).await.resume_timer(now)
    }

    pub async fn stop_timer(&self, session: &SessionId) {
        let now = self.clock.now();
        self.lock(session).await.stop_timer(now);
    }

    pub async fn extend_timer(&self, session: &SessionId, seconds: u64) {
        let now = self.clock.now();
        self.lock(session).await.extend_timer(seconds, now);
    }

    pub async fn tick(&self, session: &SessionId) -> TickOutcome {
        let now = self.clock.now();
        self.lock(session).await.tick(now)
    }

    pub async fn timer_state(&self, session: &SessionId) -> TimerState {
        match self.existing(session).await {
            Some(entry) => entry.lock().await.timer().clone(),
            None => TimerState::default(),
        }
    }

    /// 删除超过阈值未活动的会话，返回删除数量
    ///
    /// 正被持有锁的会话视为活跃，本轮跳过。
    pub async fn cleanup_inactive(&self, threshold: Duration) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.try_lock() {
            Ok(state) => elapsed(now, state.last_activity()) <= threshold,
            Err(_) => true,
        });
        before - sessions.len()
    }

    pub async fn stats(&self) -> SessionStats {
        let entries: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut stats = SessionStats {
            active_sessions: entries.len(),
            ..SessionStats::default()
        };
        for entry in entries {
            let state = entry.lock().await;
            stats.total_votes += state.vote_count();
            if state.votes_revealed() {
                stats.revealed_sessions += 1;
            }
        }
        stats
    }
}
