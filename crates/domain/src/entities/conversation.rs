//! 会话实体定义
//!
//! 一个会话对应一对（用户，店铺），由服务端保证唯一。

use serde::{Deserialize, Serialize};

use crate::entities::message::Message;
use crate::value_objects::{ConversationId, StoreId, Timestamp, UserId};

/// 当前客户端代表会话中的哪一方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    /// 买家
    #[default]
    User,
    /// 店铺（卖家后台）
    Store,
}

/// 当前客户端身份：登录用户及其在会话中的角色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: UserId,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn new(user_id: impl Into<UserId>, role: ViewerRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// 最后一条消息摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            created_at: message.created_at,
        }
    }
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: ConversationId,
    pub user_id: UserId,
    pub store_id: StoreId,
    #[serde(default)]
    pub unread_count_for_user: u32,
    #[serde(default)]
    pub unread_count_for_store: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
}

impl Conversation {
    /// 会话的新建状态：没有消息，也没有未读
    pub fn new(id: ConversationId, user_id: UserId, store_id: StoreId) -> Self {
        Self {
            id,
            user_id,
            store_id,
            unread_count_for_user: 0,
            unread_count_for_store: 0,
            last_message: None,
            last_message_at: None,
        }
    }

    /// 消息的接收方：不是发送者的那一方
    pub fn recipient_of(&self, sender_id: &UserId) -> ViewerRole {
        if *sender_id == self.user_id {
            ViewerRole::Store
        } else {
            ViewerRole::User
        }
    }

    pub fn unread_for(&self, role: ViewerRole) -> u32 {
        match role {
            ViewerRole::User => self.unread_count_for_user,
            ViewerRole::Store => self.unread_count_for_store,
        }
    }

    /// 清零某一方的未读数，返回清零前的值
    pub fn clear_unread(&mut self, role: ViewerRole) -> u32 {
        let counter = match role {
            ViewerRole::User => &mut self.unread_count_for_user,
            ViewerRole::Store => &mut self.unread_count_for_store,
        };
        std::mem::take(counter)
    }

    /// 记录一条新消息的摘要；`bump_unread` 为真时接收方未读数加一。
    ///
    /// 早于当前摘要的消息不会覆盖摘要。返回接收方。
    pub fn record_message(&mut self, message: &Message, bump_unread: bool) -> ViewerRole {
        let is_newer = self
            .last_message_at
            .map_or(true, |current| message.created_at >= current);
        if is_newer {
            self.last_message = Some(LastMessage::from(message));
            self.last_message_at = Some(message.created_at);
        }

        let recipient = self.recipient_of(&message.sender_id);
        if bump_unread {
            match recipient {
                ViewerRole::User => {
                    self.unread_count_for_user = self.unread_count_for_user.saturating_add(1)
                }
                ViewerRole::Store => {
                    self.unread_count_for_store = self.unread_count_for_store.saturating_add(1)
                }
            }
        }
        recipient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn conversation() -> Conversation {
        Conversation::new("c1".into(), "shopper".into(), "store-9".into())
    }

    fn message_from(sender: &str, secs: i64) -> Message {
        Message {
            id: format!("m{secs}").into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            text: format!("hello at {secs}"),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            is_read: false,
        }
    }

    #[test]
    fn test_recipient_is_the_other_party() {
        let conv = conversation();
        assert_eq!(conv.recipient_of(&"shopper".into()), ViewerRole::Store);
        assert_eq!(conv.recipient_of(&"store-owner".into()), ViewerRole::User);
    }

    #[test]
    fn test_record_message_bumps_recipient_counter() {
        let mut conv = conversation();
        let recipient = conv.record_message(&message_from("store-owner", 10), true);

        assert_eq!(recipient, ViewerRole::User);
        assert_eq!(conv.unread_count_for_user, 1);
        assert_eq!(conv.unread_count_for_store, 0);
        assert_eq!(conv.last_message.as_ref().unwrap().text, "hello at 10");
    }

    #[test]
    fn test_older_message_does_not_replace_preview() {
        let mut conv = conversation();
        conv.record_message(&message_from("shopper", 20), false);
        conv.record_message(&message_from("store-owner", 5), true);

        assert_eq!(conv.last_message.as_ref().unwrap().text, "hello at 20");
        assert_eq!(conv.unread_count_for_user, 1);
    }

    #[test]
    fn test_clear_unread_returns_previous_value() {
        let mut conv = conversation();
        conv.unread_count_for_store = 4;
        assert_eq!(conv.clear_unread(ViewerRole::Store), 4);
        assert_eq!(conv.unread_for(ViewerRole::Store), 0);
    }

    #[test]
    fn test_deserialize_accepts_mongo_style_id() {
        let json = r#"{
            "_id": "abc",
            "user_id": "u1",
            "store_id": "s1",
            "unread_count_for_user": 2
        }"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.id.as_str(), "abc");
        assert_eq!(conv.unread_count_for_user, 2);
        assert_eq!(conv.unread_count_for_store, 0);
        assert!(conv.last_message.is_none());
    }
}
