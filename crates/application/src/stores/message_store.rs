use std::sync::Arc;

use domain::{
    Confirmation, Conversation, ConversationId, DomainError, Message, MessageBody,
    MessageTimeline, NewMessageEvent, LocalMessageId, PendingMessage, UserId,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    clock::Clock,
    error::{ApplicationError, SendFailure},
};

/// 打开会话视图的状态机
///
/// `Idle -> Loading -> Ready <-> Sending -> Ready`，任何拉取或发送失败进入
/// `Error`（可重试，非终态）；会话在服务端不存在时进入 `NotFound`。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Idle,
    Loading,
    Ready,
    Sending,
    Error(String),
    NotFound,
}

/// 当前打开会话的可渲染快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageViewState {
    pub conversation_id: Option<ConversationId>,
    /// 会话元数据（来自会话列表，可能缺失）
    pub conversation: Option<Conversation>,
    pub timeline: MessageTimeline,
    pub view: ViewState,
    pub in_flight_sends: usize,
}

/// 一次“打开会话”的身份：会话ID加代次，重新打开同一会话也会换代
#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewToken {
    conversation_id: ConversationId,
    generation: u64,
}

struct Inner {
    view: MessageViewState,
    generation: u64,
}

impl Inner {
    fn token(&self) -> Option<ViewToken> {
        self.view.conversation_id.clone().map(|conversation_id| ViewToken {
            conversation_id,
            generation: self.generation,
        })
    }

    fn is_current(&self, token: &ViewToken) -> bool {
        self.generation == token.generation
            && self.view.conversation_id.as_ref() == Some(&token.conversation_id)
    }

    fn settle(&mut self) {
        self.view.view = if self.view.in_flight_sends > 0 {
            ViewState::Sending
        } else {
            ViewState::Ready
        };
    }
}

pub struct MessageStoreDependencies {
    pub api: Arc<dyn ChatApi>,
    pub clock: Arc<dyn Clock>,
    /// 当前登录用户，作为乐观消息的发送者
    pub viewer_id: UserId,
    pub max_message_length: usize,
}

/// 只持有当前打开会话的消息，切换会话即丢弃旧列表
pub struct MessageStore {
    deps: MessageStoreDependencies,
    inner: Mutex<Inner>,
    updates: watch::Sender<MessageViewState>,
}

impl MessageStore {
    pub fn new(deps: MessageStoreDependencies) -> Self {
        let (updates, _) = watch::channel(MessageViewState::default());
        Self {
            deps,
            inner: Mutex::new(Inner {
                view: MessageViewState::default(),
                generation: 0,
            }),
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageViewState> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> MessageViewState {
        self.inner.lock().await.view.clone()
    }

    pub async fn active(&self) -> Option<ConversationId> {
        self.inner.lock().await.view.conversation_id.clone()
    }

    fn publish(&self, view: &MessageViewState) {
        self.updates.send_replace(view.clone());
    }

    /// 打开会话：丢弃旧列表，拉取历史，成功后标记已读
    ///
    /// 返回服务端是否确认了已读回执。
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
        conversation: Option<Conversation>,
    ) -> Result<bool, ApplicationError> {
        let token = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.view = MessageViewState {
                conversation_id: Some(conversation_id.clone()),
                conversation,
                timeline: MessageTimeline::new(),
                view: ViewState::Loading,
                in_flight_sends: 0,
            };
            self.publish(&inner.view);
            ViewToken {
                conversation_id,
                generation: inner.generation,
            }
        };
        info!(conversation_id = %token.conversation_id, generation = token.generation, "opening conversation");
        self.fetch_history(token).await
    }

    /// 重新拉取当前会话并与本地合并
    pub async fn reload(&self) -> Result<bool, ApplicationError> {
        let token = {
            let mut inner = self.inner.lock().await;
            let Some(token) = inner.token() else {
                return Ok(false);
            };
            if inner.view.view != ViewState::Sending {
                inner.view.view = ViewState::Loading;
            }
            self.publish(&inner.view);
            token
        };
        self.fetch_history(token).await
    }

    async fn fetch_history(&self, token: ViewToken) -> Result<bool, ApplicationError> {
        let result = self.deps.api.list_messages(&token.conversation_id).await;

        {
            let mut inner = self.inner.lock().await;
            if !inner.is_current(&token) {
                debug!(conversation_id = %token.conversation_id, "discarding stale history response");
                return Err(ApplicationError::Stale {
                    conversation_id: token.conversation_id,
                });
            }

            match result {
                Ok(messages) => {
                    // 加载期间经实时通道到达的消息已在时间线里，按ID合并
                    let added = inner.view.timeline.merge_confirmed(messages);
                    debug!(conversation_id = %token.conversation_id, added, "history merged");
                    inner.settle();
                    self.publish(&inner.view);
                }
                Err(err) if err.is_not_found() => {
                    warn!(conversation_id = %token.conversation_id, "conversation not found");
                    inner.view.view = ViewState::NotFound;
                    self.publish(&inner.view);
                    return Err(err);
                }
                Err(err) => {
                    warn!(conversation_id = %token.conversation_id, error = %err, "failed to load messages");
                    inner.view.view = ViewState::Error(err.to_string());
                    self.publish(&inner.view);
                    return Err(err);
                }
            }
        }

        Ok(self.mark_read().await)
    }

    /// 乐观发送
    ///
    /// 空白或超长文本在本地被拒绝，不发请求。失败时移除乐观条目，
    /// 并在 [`SendFailure::draft`] 中原样返回输入文本。
    pub async fn send_message(&self, text: &str) -> Result<Message, SendFailure> {
        let body = MessageBody::parse_with_limit(text, self.deps.max_message_length)
            .map_err(|err| SendFailure::new(text, err))?;

        let (token, local_id) = {
            let mut inner = self.inner.lock().await;
            let Some(token) = inner.token() else {
                return Err(SendFailure::new(
                    text,
                    DomainError::validation_error("conversation", "no conversation is open"),
                ));
            };
            if inner.view.view == ViewState::NotFound {
                return Err(SendFailure::new(
                    text,
                    ApplicationError::not_found(token.conversation_id.to_string()),
                ));
            }

            let pending = PendingMessage {
                local_id: LocalMessageId::generate(),
                conversation_id: token.conversation_id.clone(),
                sender_id: self.deps.viewer_id.clone(),
                text: body.as_str().to_owned(),
                created_at: self.deps.clock.now(),
            };
            let local_id = pending.local_id;
            inner.view.timeline.push_pending(pending);
            inner.view.in_flight_sends += 1;
            inner.view.view = ViewState::Sending;
            self.publish(&inner.view);
            (token, local_id)
        };

        let result = self
            .deps
            .api
            .send_message(&token.conversation_id, &body)
            .await;

        let mut inner = self.inner.lock().await;
        if !inner.is_current(&token) {
            // 旧列表已丢弃，无需回滚；结果照常返回给调用方
            debug!(conversation_id = %token.conversation_id, "send resolved after view switched");
            return result.map_err(|err| SendFailure::new(text, err));
        }

        inner.view.in_flight_sends = inner.view.in_flight_sends.saturating_sub(1);
        match result {
            Ok(message) => {
                let outcome = inner.view.timeline.confirm(local_id, message.clone());
                debug!(message_id = %message.id, ?outcome, "send confirmed");
                if outcome == Confirmation::Inserted {
                    warn!(%local_id, "pending entry vanished before confirmation");
                }
                if let Some(conversation) = inner.view.conversation.as_mut() {
                    conversation.record_message(&message, false);
                }
                inner.settle();
                self.publish(&inner.view);
                Ok(message)
            }
            Err(err) => {
                warn!(conversation_id = %token.conversation_id, error = %err, "send failed, rolling back");
                inner.view.timeline.remove_pending(local_id);
                inner.view.view = ViewState::Error(err.to_string());
                self.publish(&inner.view);
                Err(SendFailure::new(text, err))
            }
        }
    }

    /// 应用实时通道推送的新消息，返回是否改变了时间线
    ///
    /// 只处理当前打开的会话；`MessageId` 已存在时为空操作。
    pub async fn apply_incoming_message_event(&self, event: &NewMessageEvent) -> bool {
        let from_other = {
            let mut inner = self.inner.lock().await;
            if inner.view.conversation_id.as_ref() != Some(&event.conversation_id) {
                return false;
            }
            if !inner.view.timeline.insert_confirmed(event.message.clone()) {
                debug!(message_id = %event.message.id, "duplicate message ignored");
                return false;
            }
            if let Some(conversation) = inner.view.conversation.as_mut() {
                conversation.record_message(&event.message, false);
            }
            self.publish(&inner.view);
            event.message.sender_id != self.deps.viewer_id
        };

        if from_other {
            self.mark_read().await;
        }
        true
    }

    /// 标记当前会话已读，返回服务端是否确认；失败只记日志，不影响显示
    pub async fn mark_read(&self) -> bool {
        let Some(token) = self.inner.lock().await.token() else {
            return false;
        };

        match self.deps.api.mark_read(&token.conversation_id).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if inner.is_current(&token)
                    && inner.view.timeline.mark_read_except(&self.deps.viewer_id) > 0
                {
                    self.publish(&inner.view);
                }
                true
            }
            Err(err) => {
                warn!(conversation_id = %token.conversation_id, error = %err, "failed to mark conversation read");
                false
            }
        }
    }

    /// 关闭当前会话，回到 Idle
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.view = MessageViewState::default();
        self.publish(&inner.view);
    }

    /// 关闭错误提示
    pub async fn dismiss_error(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.view.view, ViewState::Error(_)) {
            inner.settle();
            self.publish(&inner.view);
        }
    }
}
