//! 基础设施层实现。
//!
//! 提供聊天 REST 客户端、WebSocket 实时通道和重连退避策略，实现应用层定义的端口。

pub mod builder;
pub mod http_api;
pub mod retry;
pub mod ws_channel;

pub use builder::{Infrastructure, InfrastructureError};
pub use http_api::{ApiError, HttpChatApi};
pub use retry::Backoff;
pub use ws_channel::{WsChannelOptions, WsRealtimeChannel};
