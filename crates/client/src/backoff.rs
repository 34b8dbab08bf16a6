use std::time::Duration;

/// 重连退避策略：`base × 2^(attempt-1)`，不超过 `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次重连前的等待时间，从 1 开始计数
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = std::cmp::min(attempt.saturating_sub(1), 20);
        let factor = 1u32 << exp;
        std::cmp::min(self.base.saturating_mul(factor), self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}
