// 进程内的实时通道实现：用于测试和离线运行
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{ChannelFrame, ConnectionState, ConversationId};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::debug;

use super::{ChannelError, RealtimeChannel, RoomTracker, Subscription, SubscriptionRegistry, CONNECTED_EVENT};

#[derive(Default)]
struct LocalState {
    rooms: RoomTracker,
    sent: Vec<ChannelFrame>,
    ever_connected: bool,
}

/// 不经过网络的通道：出站帧被记录下来，入站事件通过 [`inject`](Self::inject) 注入
pub struct LocalRealtimeChannel {
    registry: SubscriptionRegistry,
    state: watch::Sender<ConnectionState>,
    local: Mutex<LocalState>,
}

impl LocalRealtimeChannel {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            registry: SubscriptionRegistry::new(),
            state,
            local: Mutex::new(LocalState::default()),
        }
    }

    fn local(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 模拟服务端推送，返回投递到的订阅者数量
    pub fn inject(&self, event: &str, payload: Value) -> usize {
        self.registry.dispatch(event, &payload)
    }

    /// 模拟连接断开
    pub fn drop_connection(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// 目前为止发出的全部帧
    pub fn sent_frames(&self) -> Vec<ChannelFrame> {
        self.local().sent.clone()
    }

    pub fn take_sent_frames(&self) -> Vec<ChannelFrame> {
        std::mem::take(&mut self.local().sent)
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn send_frames(&self, local: &mut LocalState, frames: Vec<ChannelFrame>) {
        if !self.is_connected() {
            debug!(count = frames.len(), "channel offline, room frames deferred to reconnect");
            return;
        }
        local.sent.extend(frames);
    }
}

impl Default for LocalRealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeChannel for LocalRealtimeChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Ok(());
        }
        self.state.send_replace(ConnectionState::Connecting);
        let reconnect = {
            let mut local = self.local();
            self.state.send_replace(ConnectionState::Connected);
            if let Some(frame) = local.rooms.rejoin_frame() {
                local.sent.push(frame);
            }
            std::mem::replace(&mut local.ever_connected, true)
        };
        self.registry
            .dispatch(CONNECTED_EVENT, &json!({ "reconnect": reconnect }));
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn join_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        let mut local = self.local();
        let frames = local.rooms.join(conversation_id);
        self.send_frames(&mut local, frames);
        Ok(())
    }

    async fn leave_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        let mut local = self.local();
        if let Some(frame) = local.rooms.leave(conversation_id) {
            self.send_frames(&mut local, vec![frame]);
        }
        Ok(())
    }

    fn subscribe(&self, event: &str) -> Subscription {
        self.registry.subscribe(event)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.local().sent.push(ChannelFrame::new(event, payload));
        Ok(())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn active_room(&self) -> Option<ConversationId> {
        self.local().rooms.active().cloned()
    }
}
