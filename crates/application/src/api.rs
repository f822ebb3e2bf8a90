use async_trait::async_trait;
use domain::{Conversation, ConversationId, Message, MessageBody, StoreId};

use crate::error::ApplicationError;

/// 聊天 REST 接口的数据访问端口
///
/// 实现方负责把传输失败、`success: false` 和非 2xx 状态统一映射为 [`ApplicationError`]。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    // 幂等：同一店铺多次调用返回同一会话
    async fn get_or_create_conversation(
        &self,
        store_id: &StoreId,
    ) -> Result<Conversation, ApplicationError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApplicationError>;

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApplicationError>;

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        body: &MessageBody,
    ) -> Result<Message, ApplicationError>;

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), ApplicationError>;

    // 角标用的未读总数
    async fn unread_count(&self) -> Result<u64, ApplicationError>;
}

/// 认证凭据提供者，由外部注入而不是从全局存储读取
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// 固定令牌
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}
