use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use domain::{Conversation, ConversationId, Message, MessageId, NewMessageEvent, ViewerRole};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{api::ChatApi, error::ApplicationError};

/// 会话列表的可渲染快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationListState {
    /// 按最后消息时间降序
    pub conversations: Vec<Conversation>,
    /// 角标显示的未读总数
    pub unread_total: u64,
    pub loading: bool,
    /// 至少成功加载过一次
    pub loaded: bool,
    pub error: Option<String>,
}

/// 每个会话记住的最近消息ID数量，用于识别重复投递
const RECENT_MESSAGE_IDS: usize = 64;

struct Inner {
    view: ConversationListState,
    issued_seq: u64,
    applied_seq: u64,
    recent_ids: HashMap<ConversationId, VecDeque<MessageId>>,
}

impl Inner {
    /// 记录消息ID；已经见过时返回 false
    fn remember(&mut self, message: &Message) -> bool {
        let ids = self
            .recent_ids
            .entry(message.conversation_id.clone())
            .or_default();
        if ids.contains(&message.id) {
            return false;
        }
        if ids.len() == RECENT_MESSAGE_IDS {
            ids.pop_front();
        }
        ids.push_back(message.id.clone());
        true
    }
}

/// 会话列表的唯一持有者
pub struct ConversationStore {
    api: Arc<dyn ChatApi>,
    viewer: ViewerRole,
    inner: Mutex<Inner>,
    updates: watch::Sender<ConversationListState>,
}

impl ConversationStore {
    pub fn new(api: Arc<dyn ChatApi>, viewer: ViewerRole) -> Self {
        let (updates, _) = watch::channel(ConversationListState::default());
        Self {
            api,
            viewer,
            inner: Mutex::new(Inner {
                view: ConversationListState::default(),
                issued_seq: 0,
                applied_seq: 0,
                recent_ids: HashMap::new(),
            }),
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationListState> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> ConversationListState {
        self.inner.lock().await.view.clone()
    }

    pub async fn find(&self, id: &ConversationId) -> Option<Conversation> {
        let inner = self.inner.lock().await;
        inner.view.conversations.iter().find(|c| c.id == *id).cloned()
    }

    fn publish(&self, view: &ConversationListState) {
        self.updates.send_replace(view.clone());
    }

    /// 拉取完整会话列表并整体替换本地状态
    ///
    /// 失败时保留原有数据，只记录错误。比已应用请求更早发出的响应会被丢弃。
    pub async fn load_conversations(&self) -> Result<(), ApplicationError> {
        let seq = {
            let mut inner = self.inner.lock().await;
            inner.issued_seq += 1;
            inner.view.loading = true;
            self.publish(&inner.view);
            inner.issued_seq
        };

        let result = self.api.list_conversations().await;

        let mut inner = self.inner.lock().await;
        if seq == inner.issued_seq {
            inner.view.loading = false;
        }
        if seq < inner.applied_seq {
            debug!(seq, applied = inner.applied_seq, "discarding out-of-order conversation list");
            self.publish(&inner.view);
            return Ok(());
        }

        match result {
            Ok(mut conversations) => {
                sort_by_recency(&mut conversations);
                info!(count = conversations.len(), "conversation list loaded");
                inner.applied_seq = seq;
                inner.view.conversations = conversations;
                inner.view.loaded = true;
                inner.view.error = None;
                self.publish(&inner.view);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to load conversations");
                inner.view.error = Some(err.to_string());
                self.publish(&inner.view);
                Err(err)
            }
        }
    }

    pub async fn load_unread_count(&self) -> Result<u64, ApplicationError> {
        match self.api.unread_count().await {
            Ok(count) => {
                let mut inner = self.inner.lock().await;
                inner.view.unread_total = count;
                self.publish(&inner.view);
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "failed to load unread count");
                let mut inner = self.inner.lock().await;
                inner.view.error = Some(err.to_string());
                self.publish(&inner.view);
                Err(err)
            }
        }
    }

    /// 应用实时通道推送的新消息
    ///
    /// 会话在本地存在时原地更新摘要，并在会话未打开时给接收方未读数加一；
    /// 不存在时事件信息不足以构造会话，改为整体刷新列表。
    /// 同一 `MessageId` 的重复投递只生效一次。
    pub async fn apply_incoming_message_event(
        &self,
        event: &NewMessageEvent,
        open: Option<&ConversationId>,
    ) -> Result<(), ApplicationError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.remember(&event.message) {
                debug!(conversation_id = %event.conversation_id, message_id = %event.message.id, "duplicate delivery ignored");
                return Ok(());
            }
            let is_open = open == Some(&event.conversation_id);
            if let Some(conversation) = inner
                .view
                .conversations
                .iter_mut()
                .find(|c| c.id == event.conversation_id)
            {
                let recipient = conversation.record_message(&event.message, !is_open);
                if !is_open && recipient == self.viewer {
                    inner.view.unread_total += 1;
                }
                sort_by_recency(&mut inner.view.conversations);
                self.publish(&inner.view);
                return Ok(());
            }
        }

        debug!(conversation_id = %event.conversation_id, "event for unknown conversation, refreshing list");
        self.load_conversations().await
    }

    /// 插入或替换一个会话（例如 get-or-create 的结果）
    pub async fn upsert(&self, conversation: Conversation) {
        let mut inner = self.inner.lock().await;
        match inner
            .view
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => *existing = conversation,
            None => inner.view.conversations.push(conversation),
        }
        sort_by_recency(&mut inner.view.conversations);
        self.publish(&inner.view);
    }

    /// 自己发出的消息只更新摘要，不产生未读
    pub async fn apply_local_send(&self, message: &Message) {
        let mut inner = self.inner.lock().await;
        // 之后到达的回声不再计入
        if !inner.remember(message) {
            return;
        }
        if let Some(conversation) = inner
            .view
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conversation.record_message(message, false);
            sort_by_recency(&mut inner.view.conversations);
            self.publish(&inner.view);
        }
    }

    /// 本地应用已读回执：清零当前身份的未读数并同步角标
    pub async fn apply_read(&self, id: &ConversationId) {
        let mut inner = self.inner.lock().await;
        let viewer = self.viewer;
        let cleared = inner
            .view
            .conversations
            .iter_mut()
            .find(|c| c.id == *id)
            .map_or(0, |conversation| conversation.clear_unread(viewer));
        if cleared > 0 {
            inner.view.unread_total = inner.view.unread_total.saturating_sub(u64::from(cleared));
            self.publish(&inner.view);
        }
    }

    pub async fn dismiss_error(&self) {
        let mut inner = self.inner.lock().await;
        if inner.view.error.take().is_some() {
            self.publish(&inner.view);
        }
    }
}

fn sort_by_recency(conversations: &mut [Conversation]) {
    // 稳定排序：没有消息的会话排在最后，相同时间保持服务端顺序
    conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
