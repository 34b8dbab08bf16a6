//! 心跳发送器
//!
//! 独立线程实现不会被繁忙的执行器拖慢；无法创建线程时退回到 tokio interval。
//! 两种实现都只通过通道投递 tick，由驱动任务真正发送 HEARTBEAT。

use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTick;

pub type HeartbeatSender = mpsc::UnboundedSender<HeartbeatTick>;
pub type HeartbeatReceiver = mpsc::UnboundedReceiver<HeartbeatTick>;

pub trait HeartbeatEmitter: Send {
    fn name(&self) -> &'static str;

    /// 停止发送，可重复调用
    fn stop(&mut self);
}

pub struct ThreadHeartbeat {
    stop: Option<std_mpsc::Sender<()>>,
}

impl ThreadHeartbeat {
    /// 启动后立即发送一次
    pub fn spawn(interval: Duration, beats: HeartbeatSender) -> Result<Self, ClientError> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || loop {
                if beats.send(HeartbeatTick).is_err() {
                    break;
                }
                match stop_rx.recv_timeout(interval) {
                    Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })
            .map_err(|err| ClientError::Heartbeat(err.to_string()))?;

        Ok(Self {
            stop: Some(stop_tx),
        })
    }
}

impl HeartbeatEmitter for ThreadHeartbeat {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for ThreadHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct IntervalHeartbeat {
    token: CancellationToken,
}

impl IntervalHeartbeat {
    /// 需要在 tokio 运行时内调用，第一次 tick 立即触发
    pub fn spawn(interval: Duration, beats: HeartbeatSender) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if beats.send(HeartbeatTick).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { token }
    }
}

impl HeartbeatEmitter for IntervalHeartbeat {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn stop(&mut self) {
        self.token.cancel();
    }
}

impl Drop for IntervalHeartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// 优先使用独立线程，创建失败时退回 interval
pub fn start_heartbeat(interval: Duration, beats: HeartbeatSender) -> Box<dyn HeartbeatEmitter> {
    match ThreadHeartbeat::spawn(interval, beats.clone()) {
        Ok(emitter) => Box::new(emitter),
        Err(err) => {
            tracing::warn!(error = %err, "heartbeat thread unavailable, using interval fallback");
            Box::new(IntervalHeartbeat::spawn(interval, beats))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn expect_beats(rx: &mut HeartbeatReceiver, count: usize) {
        for _ in 0..count {
            timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("beat in time")
                .expect("channel open");
        }
    }

    #[tokio::test]
    async fn thread_emitter_beats_immediately_and_repeats() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut emitter = ThreadHeartbeat::spawn(Duration::from_millis(20), tx).expect("spawn");

        expect_beats(&mut rx, 3).await;
        emitter.stop();

        // 线程退出后通道关闭
        timeout(Duration::from_secs(1), async { while rx.recv().await.is_some() {} })
            .await
            .expect("thread should exit");
    }

    #[tokio::test]
    async fn interval_emitter_beats_immediately_and_stops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut emitter = IntervalHeartbeat::spawn(Duration::from_millis(20), tx);

        expect_beats(&mut rx, 2).await;
        emitter.stop();

        timeout(Duration::from_secs(1), async { while rx.recv().await.is_some() {} })
            .await
            .expect("task should exit");
    }

    #[tokio::test]
    async fn default_strategy_prefers_thread() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut emitter = start_heartbeat(Duration::from_secs(15), tx);
        assert_eq!(emitter.name(), "thread");
        emitter.stop();
    }
}
