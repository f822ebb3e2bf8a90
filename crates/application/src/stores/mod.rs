//! 客户端状态仓库
//!
//! 会话列表和当前打开会话的消息各有唯一持有者，变更通过 `watch` 通道发布快照。

mod conversation_store;
mod message_store;

#[cfg(test)]
mod conversation_store_tests;

pub use conversation_store::{ConversationListState, ConversationStore};
pub use message_store::{MessageStore, MessageStoreDependencies, MessageViewState, ViewState};
