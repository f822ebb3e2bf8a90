//! 测试替身：可编排的内存聊天接口
//!
//! 每个操作可以被注入失败，也可以挂上闸门让响应停在半路，用来构造乱序和过期响应。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::{
    Conversation, ConversationId, Message, MessageBody, StoreId, Timestamp, UserId,
};
use tokio::sync::Semaphore;

use crate::{api::ChatApi, clock::Clock, error::ApplicationError};

pub const LIST_CONVERSATIONS: &str = "list_conversations";
pub const LIST_MESSAGES: &str = "list_messages";
pub const SEND_MESSAGE: &str = "send_message";
pub const MARK_READ: &str = "mark_read";
pub const UNREAD_COUNT: &str = "unread_count";
pub const GET_OR_CREATE: &str = "get_or_create_conversation";

pub fn at(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: &str, conversation: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation_id: conversation.into(),
        sender_id: sender.into(),
        text: format!("text of {id}"),
        created_at: at(secs),
        is_read: false,
    }
}

pub fn conversation(id: &str, user: &str, store: &str) -> Conversation {
    Conversation::new(id.into(), user.into(), store.into())
}

pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

#[derive(Default)]
struct FakeState {
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    unread: u64,
    next_message: u64,
    failures: HashMap<&'static str, ApplicationError>,
    gates: HashMap<&'static str, VecDeque<Arc<Semaphore>>>,
    calls: HashMap<&'static str, usize>,
}

/// 内存实现的 [`ChatApi`]，以 `viewer` 的身份发送消息
pub struct FakeChatApi {
    viewer: UserId,
    state: Mutex<FakeState>,
}

impl FakeChatApi {
    pub fn new(viewer: &str) -> Arc<Self> {
        Arc::new(Self {
            viewer: viewer.into(),
            state: Mutex::new(FakeState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.state().conversations = conversations;
    }

    pub fn set_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        self.state().messages.insert(conversation_id.into(), messages);
    }

    pub fn set_unread(&self, count: u64) {
        self.state().unread = count;
    }

    /// 之后每次调用 `op` 都返回该错误，直到 [`recover`](Self::recover)
    pub fn fail(&self, op: &'static str, error: ApplicationError) {
        self.state().failures.insert(op, error);
    }

    pub fn recover(&self, op: &'static str) {
        self.state().failures.remove(op);
    }

    /// 为下一次 `op` 调用挂上闸门；对返回的信号量 `add_permits(1)` 放行
    pub fn gate(&self, op: &'static str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state()
            .gates
            .entry(op)
            .or_default()
            .push_back(gate.clone());
        gate
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// 下一次发送会分配的消息ID
    pub fn next_message_id(&self) -> String {
        format!("srv-{}", self.state().next_message + 1)
    }

    /// 等到 `op` 被调用至少 `count` 次
    pub async fn wait_for_calls(&self, op: &'static str, count: usize) {
        while self.calls(op) < count {
            tokio::task::yield_now().await;
        }
    }

    fn begin(&self, op: &'static str) -> (Option<ApplicationError>, Option<Arc<Semaphore>>) {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        let gate = state.gates.get_mut(op).and_then(VecDeque::pop_front);
        (state.failures.get(op).cloned(), gate)
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        let _permit = gate.acquire().await.unwrap();
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn get_or_create_conversation(
        &self,
        store_id: &StoreId,
    ) -> Result<Conversation, ApplicationError> {
        let (failure, gate) = self.begin(GET_OR_CREATE);
        pass(gate).await;
        if let Some(err) = failure {
            return Err(err);
        }
        let mut state = self.state();
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.store_id == *store_id && c.user_id == self.viewer)
        {
            return Ok(existing.clone());
        }
        let created = Conversation::new(
            format!("conv-{store_id}").into(),
            self.viewer.clone(),
            store_id.clone(),
        );
        state.conversations.push(created.clone());
        Ok(created)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApplicationError> {
        let (failure, gate) = self.begin(LIST_CONVERSATIONS);
        let snapshot = self.state().conversations.clone();
        pass(gate).await;
        match failure {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApplicationError> {
        let (failure, gate) = self.begin(LIST_MESSAGES);
        let snapshot = self.state().messages.get(conversation_id).cloned();
        pass(gate).await;
        if let Some(err) = failure {
            return Err(err);
        }
        snapshot.ok_or_else(|| ApplicationError::not_found(conversation_id.to_string()))
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        body: &MessageBody,
    ) -> Result<Message, ApplicationError> {
        let (failure, gate) = self.begin(SEND_MESSAGE);
        let created = {
            let mut state = self.state();
            state.next_message += 1;
            let secs = 1_000 + state.next_message as i64;
            Message {
                id: format!("srv-{}", state.next_message).into(),
                conversation_id: conversation_id.clone(),
                sender_id: self.viewer.clone(),
                text: body.as_str().to_owned(),
                created_at: at(secs),
                is_read: false,
            }
        };
        pass(gate).await;
        if let Some(err) = failure {
            return Err(err);
        }
        self.state()
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn mark_read(&self, _conversation_id: &ConversationId) -> Result<(), ApplicationError> {
        let (failure, gate) = self.begin(MARK_READ);
        pass(gate).await;
        failure.map_or(Ok(()), Err)
    }

    async fn unread_count(&self) -> Result<u64, ApplicationError> {
        let (failure, gate) = self.begin(UNREAD_COUNT);
        pass(gate).await;
        match failure {
            Some(err) => Err(err),
            None => Ok(self.state().unread),
        }
    }
}
