use domain::{ConversationId, DomainError};
use thiserror::Error;

use crate::realtime::ChannelError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplicationError {
    /// 本地输入校验失败，未发出任何网络请求
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    /// 服务端拒绝了请求参数
    #[error("validation failed: {0}")]
    Validation(String),
    /// 请求的资源在服务端不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// 请求未能完成或服务端返回失败，可重试
    #[error("network error: {0}")]
    Network(String),
    /// 响应到达时对应的会话已不再处于打开状态
    #[error("stale response for conversation {conversation_id}")]
    Stale { conversation_id: ConversationId },
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl ApplicationError {
    pub fn network(message: impl Into<String>) -> Self {
        ApplicationError::Network(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApplicationError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    /// 可由用户重试或自动重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplicationError::Network(_) | ApplicationError::Channel(_))
    }

    pub fn is_validation(&self) -> bool {
        match self {
            ApplicationError::Domain(err) => err.is_validation(),
            ApplicationError::Validation(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApplicationError::NotFound(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ApplicationError::Stale { .. })
    }
}

/// 发送失败：携带原始输入，调用方据此恢复输入框内容
#[derive(Debug, Error, Clone, PartialEq)]
#[error("failed to send message: {error}")]
pub struct SendFailure {
    /// 调用方传入的原始文本，未经修剪
    pub draft: String,
    #[source]
    pub error: ApplicationError,
}

impl SendFailure {
    pub fn new(draft: impl Into<String>, error: impl Into<ApplicationError>) -> Self {
        Self {
            draft: draft.into(),
            error: error.into(),
        }
    }
}
