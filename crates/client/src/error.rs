use domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("heartbeat emitter unavailable: {0}")]
    Heartbeat(String),
    #[error("client task has stopped")]
    Stopped,
}
