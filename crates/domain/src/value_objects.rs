use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 消息正文的默认长度上限（按字符计）。
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1000;

/// 服务端分配的不透明标识。
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// 会话唯一标识。
    ConversationId
);
opaque_id!(
    /// 消息唯一标识，由服务端分配后保持稳定。
    MessageId
);
opaque_id!(
    /// 用户唯一标识。
    UserId
);
opaque_id!(
    /// 店铺唯一标识。
    StoreId
);

/// 未确认消息的本地临时标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalMessageId(pub Uuid);

impl LocalMessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalMessageId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for LocalMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// 经过验证的消息正文。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBody(String);

impl MessageBody {
    /// 按默认上限校验。
    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        Self::parse_with_limit(value, DEFAULT_MAX_MESSAGE_LENGTH)
    }

    /// 去除首尾空白后校验：不能为空，字符数不能超过 `max`。
    pub fn parse_with_limit(value: impl Into<String>, max: usize) -> DomainResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyMessage);
        }
        let length = trimmed.chars().count();
        if length > max {
            return Err(DomainError::MessageTooLong { length, max });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_rejects_blank_input() {
        assert_eq!(MessageBody::parse(""), Err(DomainError::EmptyMessage));
        assert_eq!(MessageBody::parse("   \n\t"), Err(DomainError::EmptyMessage));
    }

    #[test]
    fn test_message_body_trims_and_counts_chars() {
        let body = MessageBody::parse("  你好  ").unwrap();
        assert_eq!(body.as_str(), "你好");

        // 多字节字符按字符计数，而不是按字节
        let exactly_max = "好".repeat(DEFAULT_MAX_MESSAGE_LENGTH);
        assert!(MessageBody::parse(exactly_max).is_ok());

        let too_long = "a".repeat(DEFAULT_MAX_MESSAGE_LENGTH + 1);
        assert_eq!(
            MessageBody::parse(too_long),
            Err(DomainError::MessageTooLong {
                length: DEFAULT_MAX_MESSAGE_LENGTH + 1,
                max: DEFAULT_MAX_MESSAGE_LENGTH,
            })
        );
    }

    #[test]
    fn test_opaque_ids_serialize_transparently() {
        let id = ConversationId::new("c-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-42\"");
        let back: ConversationId = serde_json::from_str("\"c-42\"").unwrap();
        assert_eq!(back, id);
    }
}
