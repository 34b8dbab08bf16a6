//! 共享的倒计时驱动
//!
//! 一个 1 秒间隔的循环驱动所有登记的会话。第一次登记时启动，
//! 没有会话登记时退出。已登记但计时器不在运行的会话会在下一次 tick 时被移除。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use domain::{Content, MessageType, SessionId, TickOutcome, WireMessage, TIMER_EXPIRED};
use tokio::sync::Mutex;

use crate::broadcaster::MessageBroadcaster;
use crate::session_store::SessionStore;

#[derive(Default)]
struct Registration {
    sessions: HashSet<SessionId>,
    running: bool,
}

struct Inner {
    store: Arc<SessionStore>,
    broadcaster: Arc<dyn MessageBroadcaster>,
    tick_interval: Duration,
    registration: Mutex<Registration>,
}

#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Inner>,
}

impl TimerService {
    pub fn new(
        store: Arc<SessionStore>,
        broadcaster: Arc<dyn MessageBroadcaster>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                broadcaster,
                tick_interval,
                registration: Mutex::new(Registration::default()),
            }),
        }
    }

    pub async fn register(&self, session: SessionId) {
        let mut registration = self.inner.registration.lock().await;
        registration.sessions.insert(session);
        if !registration.running {
            registration.running = true;
            tracing::info!("starting timer service");
            tokio::spawn(run(self.inner.clone()));
        }
    }

    pub async fn unregister(&self, session: &SessionId) {
        self.inner.registration.lock().await.sessions.remove(session);
    }

    pub async fn is_registered(&self, session: &SessionId) -> bool {
        self.inner
            .registration
            .lock()
            .await
            .sessions
            .contains(session)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.registration.lock().await.running
    }

    /// 驱动一次 tick，返回每个仍在运行的会话的结果
    pub async fn tick_once(&self) -> Vec<(SessionId, TickOutcome)> {
        self.inner.tick_once().await
    }

    /// 清空登记，循环会在下一次 tick 后退出
    pub async fn shutdown(&self) {
        self.inner.registration.lock().await.sessions.clear();
    }
}

async fn run(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.tick_interval);
    // 第一次 tick 立即返回
    interval.tick().await;
    loop {
        interval.tick().await;
        inner.tick_once().await;

        let mut registration = inner.registration.lock().await;
        if registration.sessions.is_empty() {
            registration.running = false;
            tracing::info!("stopping timer service");
            break;
        }
    }
}

impl Inner {
    async fn tick_once(&self) -> Vec<(SessionId, TickOutcome)> {
        let sessions: Vec<SessionId> = self
            .registration
            .lock()
            .await
            .sessions
            .iter()
            .cloned()
            .collect();

        let mut finished = Vec::new();
        let mut outcomes = Vec::new();

        for session in sessions {
            let mut state = self.store.lock(&session).await;
            if !state.timer().is_running() {
                finished.push(session);
                continue;
            }

            let now = self.store.now();
            let outcome = state.tick(now);
            let tick = WireMessage::server(
                MessageType::TimerTick,
                Some(Content::number(outcome.remaining)),
                now,
            )
            .with_session(session.as_str());
            self.send(&session, &tick).await;

            if outcome.expired {
                tracing::info!(session = %session, "timer expired, revealing votes");
                state.reveal(now);
                let reveal = WireMessage::server(
                    MessageType::ShowVotes,
                    Some(Content::text(TIMER_EXPIRED)),
                    now,
                )
                .with_session(session.as_str());
                self.send(&session, &reveal).await;
                finished.push(session.clone());
            }
            drop(state);
            outcomes.push((session, outcome));
        }

        if !finished.is_empty() {
            let mut registration = self.registration.lock().await;
            for session in &finished {
                registration.sessions.remove(session);
            }
        }
        outcomes
    }

    async fn send(&self, session: &SessionId, message: &WireMessage) {
        if let Err(err) = self.broadcaster.broadcast(session, message, None).await {
            tracing::warn!(session = %session, error = %err, "timer broadcast failed");
        }
    }
}
