//! 实时通道上的聊天事件
//!
//! 定义事件名称、帧格式以及 `new_message` 事件的负载。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::message::Message;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::ConversationId;

/// 事件名称
pub mod event_names {
    /// 入站：新消息
    pub const NEW_MESSAGE: &str = "new_message";
    /// 出站：加入会话房间
    pub const JOIN_CONVERSATION: &str = "join_conversation";
    /// 出站：离开会话房间
    pub const LEAVE_CONVERSATION: &str = "leave_conversation";
}

/// 通道上传输的一帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn join(conversation_id: &ConversationId) -> Self {
        Self::new(
            event_names::JOIN_CONVERSATION,
            RoomPayload::new(conversation_id.clone()).to_value(),
        )
    }

    pub fn leave(conversation_id: &ConversationId) -> Self {
        Self::new(
            event_names::LEAVE_CONVERSATION,
            RoomPayload::new(conversation_id.clone()).to_value(),
        )
    }
}

/// 加入/离开房间的负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPayload {
    pub conversation_id: ConversationId,
}

impl RoomPayload {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self { conversation_id }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "conversation_id": self.conversation_id })
    }
}

/// `new_message` 事件负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageEvent {
    pub conversation_id: ConversationId,
    pub message: Message,
}

impl NewMessageEvent {
    pub fn new(message: Message) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            message,
        }
    }

    /// 解析通道负载；外层会话ID与消息自身的会话ID不一致时视为格式错误
    pub fn from_payload(payload: &Value) -> DomainResult<Self> {
        let event: Self = serde_json::from_value(payload.clone())
            .map_err(|err| DomainError::MalformedEvent(err.to_string()))?;
        if event.conversation_id != event.message.conversation_id {
            return Err(DomainError::MalformedEvent(format!(
                "conversation mismatch: event {} carries message for {}",
                event.conversation_id, event.message.conversation_id
            )));
        }
        Ok(event)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(outer: &str, inner: &str) -> Value {
        json!({
            "conversation_id": outer,
            "message": {
                "_id": "m1",
                "conversation_id": inner,
                "sender_id": "u1",
                "message": "hi",
                "created_at": "2024-05-01T10:00:00Z"
            }
        })
    }

    #[test]
    fn test_parse_new_message_payload() {
        let event = NewMessageEvent::from_payload(&payload("c1", "c1")).unwrap();
        assert_eq!(event.conversation_id.as_str(), "c1");
        assert_eq!(event.message.id.as_str(), "m1");
        assert_eq!(event.message.text, "hi");
        assert!(!event.message.is_read);
    }

    #[test]
    fn test_mismatched_conversation_is_rejected() {
        let err = NewMessageEvent::from_payload(&payload("c1", "c2")).unwrap_err();
        assert!(matches!(err, DomainError::MalformedEvent(_)));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let err = NewMessageEvent::from_payload(&json!({"hello": 1})).unwrap_err();
        assert!(matches!(err, DomainError::MalformedEvent(_)));
    }

    #[test]
    fn test_room_frames() {
        let frame = ChannelFrame::join(&"c7".into());
        assert_eq!(frame.event, event_names::JOIN_CONVERSATION);
        assert_eq!(frame.data, json!({"conversation_id": "c7"}));

        let text = serde_json::to_string(&ChannelFrame::leave(&"c7".into())).unwrap();
        assert_eq!(
            text,
            r#"{"event":"leave_conversation","data":{"conversation_id":"c7"}}"#
        );
    }
}
