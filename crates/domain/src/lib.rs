//! 聊天客户端核心领域模型
//!
//! 包含会话、消息、实时事件等核心实体，以及相关的校验和排序规则。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
