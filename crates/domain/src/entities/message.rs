//! 消息实体定义
//!
//! 包含服务端确认的消息、本地待确认消息，以及按时间排序的消息时间线。

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, LocalMessageId, MessageId, Timestamp, UserId};

/// 服务端确认的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(alias = "message", alias = "body")]
    pub text: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub is_read: bool,
}

/// 乐观发送、尚未被服务端确认的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMessage {
    pub local_id: LocalMessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

/// 时间线中的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageEntry {
    Pending(PendingMessage),
    Confirmed(Message),
}

impl MessageEntry {
    pub fn created_at(&self) -> Timestamp {
        match self {
            Self::Pending(pending) => pending.created_at,
            Self::Confirmed(message) => message.created_at,
        }
    }

    /// 仅确认消息有服务端ID
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(message) => Some(&message.id),
        }
    }

    pub fn local_id(&self) -> Option<LocalMessageId> {
        match self {
            Self::Pending(pending) => Some(pending.local_id),
            Self::Confirmed(_) => None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Pending(pending) => &pending.text,
            Self::Confirmed(message) => &message.text,
        }
    }

    pub fn sender_id(&self) -> &UserId {
        match self {
            Self::Pending(pending) => &pending.sender_id,
            Self::Confirmed(message) => &message.sender_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// 确认一条待发送消息的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// 待确认消息被替换为服务端消息
    Replaced,
    /// 同ID的消息已经通过实时通道到达，待确认消息被丢弃
    AlreadyPresent,
    /// 找不到对应的待确认消息，服务端消息按普通消息插入
    Inserted,
}

/// 单个会话的消息时间线
///
/// 不变量：条目按 `created_at` 升序排列（相同时间保持到达顺序），
/// 同一个 `MessageId` 最多出现一次。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageTimeline {
    entries: Vec<MessageEntry>,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从服务端历史构建，重复ID只保留第一条
    pub fn from_confirmed(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut timeline = Self::new();
        timeline.merge_confirmed(messages);
        timeline
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_pending()).count()
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.message_id() == Some(id))
    }

    /// 所有已确认消息（按时间顺序）
    pub fn confirmed(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(|entry| match entry {
            MessageEntry::Confirmed(message) => Some(message),
            MessageEntry::Pending(_) => None,
        })
    }

    /// 插入一条已确认消息；ID已存在时返回 false 且不做任何修改
    pub fn insert_confirmed(&mut self, message: Message) -> bool {
        if self.contains_id(&message.id) {
            return false;
        }
        self.insert_sorted(MessageEntry::Confirmed(message));
        true
    }

    /// 合并一批已确认消息，返回新增条数
    pub fn merge_confirmed(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.insert_confirmed(message) {
                added += 1;
            }
        }
        added
    }

    pub fn push_pending(&mut self, pending: PendingMessage) {
        self.insert_sorted(MessageEntry::Pending(pending));
    }

    /// 用服务端确认的消息替换待确认消息
    ///
    /// 去重以 `MessageId` 为准，正文和时间戳不参与匹配。
    pub fn confirm(&mut self, local_id: LocalMessageId, message: Message) -> Confirmation {
        let pending = self.remove_pending(local_id);
        if self.contains_id(&message.id) {
            return Confirmation::AlreadyPresent;
        }
        self.insert_sorted(MessageEntry::Confirmed(message));
        if pending.is_some() {
            Confirmation::Replaced
        } else {
            Confirmation::Inserted
        }
    }

    pub fn remove_pending(&mut self, local_id: LocalMessageId) -> Option<PendingMessage> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.local_id() == Some(local_id))?;
        match self.entries.remove(index) {
            MessageEntry::Pending(pending) => Some(pending),
            MessageEntry::Confirmed(_) => None,
        }
    }

    /// 把对方发来的消息标记为已读，返回被修改的条数
    pub fn mark_read_except(&mut self, viewer: &UserId) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if let MessageEntry::Confirmed(message) = entry {
                if !message.is_read && message.sender_id != *viewer {
                    message.is_read = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    fn insert_sorted(&mut self, entry: MessageEntry) {
        let at = entry.created_at();
        let index = self.entries.partition_point(|existing| existing.created_at() <= at);
        self.entries.insert(index, entry);
    }
}
