//! 实时通道抽象
//!
//! 连接生命周期、房间加入/离开和按事件名订阅。通道只是提示机制，
//! 不是数据的权威来源：重连后不会重放错过的事件，调用方需要通过 REST 对账。

mod local;
mod registry;
mod room;

use async_trait::async_trait;
use domain::{ConnectionState, ConversationId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

pub use local::LocalRealtimeChannel;
pub use registry::{Subscription, SubscriptionRegistry};
pub use room::RoomTracker;

/// 通道内部事件：每次进入 Connected 时分发，负载 `{"reconnect": bool}`
pub const CONNECTED_EVENT: &str = "connect";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel has been shut down")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ChannelError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChannelError::Transport(message.into())
    }
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// 建立连接；失败时进入带退避的重试循环，而不是返回错误
    async fn connect(&self) -> Result<(), ChannelError>;

    /// 停止重试并关闭连接
    async fn disconnect(&self);

    /// 加入会话房间；已在其他房间时先离开旧房间
    async fn join_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError>;

    async fn leave_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError>;

    /// 订阅指定事件；同一事件允许多个订阅者，`Subscription` 被丢弃时自动退订
    fn subscribe(&self, event: &str) -> Subscription;

    /// 尽力发送，不保证送达
    async fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    fn active_room(&self) -> Option<ConversationId>;
}
