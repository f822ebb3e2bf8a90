use domain::{ChannelFrame, ConversationId};

/// 跟踪当前加入的房间，同一通道最多一个
#[derive(Debug, Default, Clone)]
pub struct RoomTracker {
    active: Option<ConversationId>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// 切换到新房间，返回需要发出的帧（先离开旧房间，再加入新房间）
    pub fn join(&mut self, conversation_id: &ConversationId) -> Vec<ChannelFrame> {
        if self.active.as_ref() == Some(conversation_id) {
            return Vec::new();
        }
        let mut frames = Vec::with_capacity(2);
        if let Some(previous) = self.active.take() {
            frames.push(ChannelFrame::leave(&previous));
        }
        frames.push(ChannelFrame::join(conversation_id));
        self.active = Some(conversation_id.clone());
        frames
    }

    /// 离开指定房间；不是当前房间时什么也不做
    pub fn leave(&mut self, conversation_id: &ConversationId) -> Option<ChannelFrame> {
        if self.active.as_ref() != Some(conversation_id) {
            return None;
        }
        self.active = None;
        Some(ChannelFrame::leave(conversation_id))
    }

    /// 重连后重新加入当前房间
    pub fn rejoin_frame(&self) -> Option<ChannelFrame> {
        self.active.as_ref().map(ChannelFrame::join)
    }
}
