use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{
    event_names, ConnectionState, Conversation, ConversationId, Message, MessageBody,
    NewMessageEvent, StoreId, Viewer,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    clock::Clock,
    error::{ApplicationError, SendFailure},
    realtime::{RealtimeChannel, Subscription, CONNECTED_EVENT},
    stores::{
        ConversationListState, ConversationStore, MessageStore, MessageStoreDependencies,
        MessageViewState,
    },
};

pub struct ChatClientDependencies {
    pub api: Arc<dyn ChatApi>,
    pub channel: Arc<dyn RealtimeChannel>,
    pub clock: Arc<dyn Clock>,
    pub viewer: Viewer,
    pub max_message_length: usize,
}

/// 聊天客户端门面：组合 REST 接口、实时通道和两个状态仓库
pub struct ChatClient {
    api: Arc<dyn ChatApi>,
    channel: Arc<dyn RealtimeChannel>,
    viewer: Viewer,
    max_message_length: usize,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(deps: ChatClientDependencies) -> Self {
        let conversations = Arc::new(ConversationStore::new(deps.api.clone(), deps.viewer.role));
        let messages = Arc::new(MessageStore::new(MessageStoreDependencies {
            api: deps.api.clone(),
            clock: deps.clock,
            viewer_id: deps.viewer.user_id.clone(),
            max_message_length: deps.max_message_length,
        }));
        Self {
            api: deps.api,
            channel: deps.channel,
            viewer: deps.viewer,
            max_message_length: deps.max_message_length,
            conversations,
            messages,
            pump: Mutex::new(None),
        }
    }

    fn pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// 订阅实时事件、启动事件泵并建立连接；重复调用无副作用
    pub async fn start(&self) -> Result<(), ApplicationError> {
        {
            let mut pump = self.pump();
            if pump.is_none() {
                // 先订阅再连接，首个 connect 事件不会丢失
                let pump_task = EventPump {
                    new_messages: self.channel.subscribe(event_names::NEW_MESSAGE),
                    connected: self.channel.subscribe(CONNECTED_EVENT),
                    conversations: self.conversations.clone(),
                    messages: self.messages.clone(),
                };
                *pump = Some(tokio::spawn(pump_task.run()));
            }
        }

        info!(user_id = %self.viewer.user_id, "starting chat client");
        self.channel.connect().await?;
        Ok(())
    }

    /// 离开房间、停止事件泵并断开连接
    pub async fn dispose(&self) {
        self.close_conversation().await;

        let handle = self.pump().take();
        if let Some(handle) = handle {
            handle.abort();
            // 等待任务真正结束，订阅随之释放
            let _ = handle.await;
        }

        self.channel.disconnect().await;
        info!(user_id = %self.viewer.user_id, "chat client disposed");
    }

    /// 获取或创建与店铺的会话，结果并入会话列表
    pub async fn get_or_create_conversation(
        &self,
        store_id: &StoreId,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = self.api.get_or_create_conversation(store_id).await?;
        debug!(store_id = %store_id, conversation_id = %conversation.id, "conversation resolved");
        self.conversations.upsert(conversation.clone()).await;
        Ok(conversation)
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApplicationError> {
        self.conversations.load_conversations().await?;
        Ok(self.conversations.snapshot().await.conversations)
    }

    pub async fn get_unread_count(&self) -> Result<u64, ApplicationError> {
        self.conversations.load_unread_count().await
    }

    /// 打开会话：切换房间、加载历史，服务端确认已读后在本地清零未读
    ///
    /// 加载期间又打开了其他会话时，本次结果被丢弃并返回 `Ok`。
    pub async fn open_conversation(&self, id: &ConversationId) -> Result<(), ApplicationError> {
        if let Err(err) = self.channel.join_room(id).await {
            warn!(conversation_id = %id, error = %err, "failed to join conversation room");
        }

        let metadata = self.conversations.find(id).await;
        match self.messages.open_conversation(id.clone(), metadata).await {
            Ok(acknowledged) => {
                if acknowledged {
                    self.conversations.apply_read(id).await;
                }
                Ok(())
            }
            Err(err) if err.is_stale() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// 关闭当前会话并离开其房间
    pub async fn close_conversation(&self) {
        let Some(id) = self.messages.active().await else {
            return;
        };
        if let Err(err) = self.channel.leave_room(&id).await {
            warn!(conversation_id = %id, error = %err, "failed to leave conversation room");
        }
        self.messages.close().await;
    }

    /// 发送消息
    ///
    /// 目标是当前打开的会话时走乐观发送；否则校验后直接提交并更新列表摘要。
    pub async fn send(&self, id: &ConversationId, text: &str) -> Result<Message, SendFailure> {
        let message = if self.messages.active().await.as_ref() == Some(id) {
            self.messages.send_message(text).await?
        } else {
            let body = MessageBody::parse_with_limit(text, self.max_message_length)
                .map_err(|err| SendFailure::new(text, err))?;
            self.api
                .send_message(id, &body)
                .await
                .map_err(|err| SendFailure::new(text, err))?
        };

        self.conversations.apply_local_send(&message).await;
        Ok(message)
    }

    /// 标记已读；失败只记日志
    pub async fn mark_read(&self, id: &ConversationId) {
        if self.messages.active().await.as_ref() == Some(id) {
            if self.messages.mark_read().await {
                self.conversations.apply_read(id).await;
            }
            return;
        }

        match self.api.mark_read(id).await {
            Ok(()) => self.conversations.apply_read(id).await,
            Err(err) => {
                warn!(conversation_id = %id, error = %err, "failed to mark conversation read");
            }
        }
    }

    pub fn conversations(&self) -> watch::Receiver<ConversationListState> {
        self.conversations.subscribe()
    }

    pub fn messages(&self) -> watch::Receiver<MessageViewState> {
        self.messages.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.connection_state()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(handle) = self.pump().take() {
            handle.abort();
        }
    }
}

/// 把实时事件分发到两个仓库的后台任务
struct EventPump {
    new_messages: Subscription,
    connected: Subscription,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
}

impl EventPump {
    async fn run(mut self) {
        loop {
            tokio::select! {
                payload = self.new_messages.recv() => match payload {
                    Some(payload) => self.route_new_message(&payload).await,
                    None => break,
                },
                payload = self.connected.recv() => match payload {
                    Some(payload) => self.on_connected(&payload).await,
                    None => break,
                },
            }
        }
        debug!("event pump stopped");
    }

    async fn route_new_message(&self, payload: &Value) {
        let event = match NewMessageEvent::from_payload(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed new_message payload");
                return;
            }
        };

        let open = self.messages.active().await;
        self.messages.apply_incoming_message_event(&event).await;
        if let Err(err) = self
            .conversations
            .apply_incoming_message_event(&event, open.as_ref())
            .await
        {
            warn!(conversation_id = %event.conversation_id, error = %err, "failed to apply message to conversation list");
        }
    }

    /// 重连后通过 REST 对账：通道不会重放断线期间的事件
    async fn on_connected(&self, payload: &Value) {
        let reconnect = payload
            .get("reconnect")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !reconnect {
            return;
        }

        info!("channel reconnected, reconciling state");
        if let Err(err) = self.conversations.load_conversations().await {
            warn!(error = %err, "failed to reload conversations after reconnect");
        }
        if let Err(err) = self.conversations.load_unread_count().await {
            warn!(error = %err, "failed to reload unread count after reconnect");
        }
        match self.messages.reload().await {
            Err(err) if !err.is_stale() => {
                warn!(error = %err, "failed to reload messages after reconnect");
            }
            _ => {}
        }
    }
}
