//! 基于 reqwest 的聊天 REST 客户端
//!
//! 所有响应都包在 `{ success, data, message? }` 信封里；非 2xx 状态或
//! `success: false` 都视为失败，并映射为 [`ApplicationError`]。
//! 路径中的会话ID按单个路径段转义。

use std::sync::Arc;
use std::time::Duration;

use application::{ApplicationError, ChatApi, CredentialProvider};
use async_trait::async_trait;
use config::ApiConfig;
use domain::{Conversation, ConversationId, Message, MessageBody, StoreId};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl From<ApiError> for ApplicationError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Server { status, message } => match status {
                404 => ApplicationError::NotFound(message),
                400 | 422 => ApplicationError::Validation(message),
                _ => ApplicationError::Network(format!("status {status}: {message}")),
            },
            other => ApplicationError::Network(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// 未读总数：`{"count": n}` 或裸数字
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnreadCount {
    Wrapped { count: u64 },
    Bare(u64),
}

impl From<UnreadCount> for u64 {
    fn from(value: UnreadCount) -> Self {
        match value {
            UnreadCount::Wrapped { count } => count,
            UnreadCount::Bare(count) => count,
        }
    }
}

#[derive(Clone)]
pub struct HttpChatApi {
    base_url: Url,
    http: Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpChatApi {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        let raw: String = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{raw}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(raw));
        }
        Ok(Self {
            base_url,
            http: Client::builder().timeout(timeout).build()?,
            credentials,
        })
    }

    pub fn from_config(
        config: &ApiConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        Self::new(&config.base_url, config.request_timeout(), credentials)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// 在基础地址后追加路径段，每段单独转义
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // 构造时已排除 cannot-be-a-base 地址
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.http.request(method, self.endpoint(segments));
        match self.credentials.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_envelope<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let res = builder.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiEnvelope<Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            warn!(status = status.as_u16(), %message, "chat api request failed");
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request was not successful".to_owned());
            warn!(%message, "chat api reported failure");
            return Err(ApiError::Rejected(message));
        }
        Ok(envelope)
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        self.send_envelope(builder)
            .await?
            .data
            .ok_or_else(|| ApiError::InvalidResponse("missing data field".to_owned()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn get_or_create_conversation(
        &self,
        store_id: &StoreId,
    ) -> Result<Conversation, ApplicationError> {
        debug!(store_id = %store_id, "get or create conversation");
        let builder = self
            .request(Method::POST, &["chat", "conversations"])
            .json(&json!({ "store_id": store_id }));
        Ok(self.execute(builder).await?)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApplicationError> {
        let builder = self.request(Method::GET, &["chat", "conversations"]);
        Ok(self.execute(builder).await?)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApplicationError> {
        let builder = self.request(
            Method::GET,
            &["chat", "conversations", conversation_id.as_str(), "messages"],
        );
        Ok(self.execute(builder).await?)
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        body: &MessageBody,
    ) -> Result<Message, ApplicationError> {
        let builder = self
            .request(
                Method::POST,
                &["chat", "conversations", conversation_id.as_str(), "messages"],
            )
            .json(&json!({ "message": body.as_str() }));
        Ok(self.execute(builder).await?)
    }

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), ApplicationError> {
        let builder = self.request(
            Method::PATCH,
            &["chat", "conversations", conversation_id.as_str(), "read"],
        );
        self.send_envelope::<Value>(builder).await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, ApplicationError> {
        let builder = self.request(Method::GET, &["chat", "unread-count"]);
        let count: UnreadCount = self.execute(builder).await?;
        Ok(count.into())
    }
}
