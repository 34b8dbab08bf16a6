use async_trait::async_trait;
use domain::{ConnectionId, SessionId, WireMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 一次扇出的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 会话内的消息投递
///
/// 单个接收者失败只记录日志，不会中断其余接收者的投递。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    /// 发送给会话内所有连接，`exclude` 除外
    async fn broadcast(
        &self,
        session: &SessionId,
        message: &WireMessage,
        exclude: Option<ConnectionId>,
    ) -> Result<BroadcastReport, BroadcastError>;

    /// 只发送给单个连接
    async fn send_to(
        &self,
        connection: ConnectionId,
        message: &WireMessage,
    ) -> Result<(), BroadcastError>;
}
