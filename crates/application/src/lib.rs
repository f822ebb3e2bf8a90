//! 应用层实现。
//!
//! 定义 REST 接口和实时通道的端口、会话与消息两个状态仓库，
//! 以及把它们组合起来的聊天客户端门面。

pub mod api;
pub mod clock;
pub mod error;
pub mod realtime;
pub mod services;
pub mod stores;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ChatApi, CredentialProvider, StaticCredentials};
pub use clock::{Clock, SystemClock};
pub use error::{ApplicationError, SendFailure};
pub use realtime::{
    ChannelError, LocalRealtimeChannel, RealtimeChannel, RoomTracker, Subscription,
    SubscriptionRegistry, CONNECTED_EVENT,
};
pub use services::{ChatClient, ChatClientDependencies};
pub use stores::{
    ConversationListState, ConversationStore, MessageStore, MessageStoreDependencies,
    MessageViewState, ViewState,
};
