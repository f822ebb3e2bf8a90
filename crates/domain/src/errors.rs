//! 领域模型错误定义
//!
//! 定义了客户端领域层可能出现的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 消息内容为空（或只包含空白字符）
    #[error("message body cannot be empty")]
    EmptyMessage,

    /// 消息内容过长
    #[error("message body too long: {length} > {max}")]
    MessageTooLong { length: usize, max: usize },

    /// 资源不存在错误
    #[error("{resource_type} not found: {resource_id}")]
    ResourceNotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// 验证错误
    #[error("validation failed: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 实时事件负载格式错误
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn resource_not_found(resource_type: &'static str, resource_id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// 是否属于本地输入校验失败
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::MessageTooLong { .. } | Self::ValidationError { .. }
        )
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
