//! 领域实体定义
//!
//! 包含客户端的核心实体：会话、消息、连接状态。

pub mod connection;
pub mod conversation;
pub mod message;

// 重新导出核心实体
pub use connection::ConnectionState;
pub use conversation::{Conversation, LastMessage, Viewer, ViewerRole};
pub use message::{Confirmation, Message, MessageEntry, MessageTimeline, PendingMessage};
