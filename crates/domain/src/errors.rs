//! 领域模型错误定义
//!
//! 定义了会话、消息编解码过程中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 入站消息无法解析（只拒绝这一条消息，不影响连接）
    #[error("消息格式错误: {reason}")]
    MalformedMessage { reason: String },

    /// 会话ID无效
    #[error("无效的会话ID: {reason}")]
    InvalidSessionId { reason: String },

    /// 状态快照解析失败
    #[error("状态快照解析失败: {reason}")]
    SnapshotDecode { reason: String },

    /// 序列化失败
    #[error("序列化失败: {reason}")]
    Serialization { reason: String },

    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },
}

impl DomainError {
    /// 创建消息格式错误
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// 创建会话ID错误
    pub fn invalid_session_id(reason: impl Into<String>) -> Self {
        Self::InvalidSessionId {
            reason: reason.into(),
        }
    }

    /// 创建快照解析错误
    pub fn snapshot_decode(reason: impl Into<String>) -> Self {
        Self::SnapshotDecode {
            reason: reason.into(),
        }
    }

    /// 创建序列化错误
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
