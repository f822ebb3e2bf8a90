use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>,
}

/// 事件名到订阅者的登记表
///
/// 每个订阅者拥有独立的无界队列，分发不会因某个订阅者处理慢而阻塞。
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

fn lock(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .subscribers
            .entry(event.to_owned())
            .or_default()
            .push((id, sender));

        Subscription {
            id,
            event: event.to_owned(),
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// 分发给该事件的全部订阅者，返回成功投递的数量
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let mut inner = lock(&self.inner);
        let Some(subscribers) = inner.subscribers.get_mut(event) else {
            debug!(event, "no subscribers for event");
            return 0;
        };
        // 接收端已经关闭的订阅者顺带清理掉
        subscribers.retain(|(_, sender)| sender.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            inner.subscribers.remove(event);
        }
        delivered
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        lock(&self.inner)
            .subscribers
            .get(event)
            .map_or(0, Vec::len)
    }
}

/// 单个事件订阅；`unsubscribe` 或丢弃时从登记表中移除
pub struct Subscription {
    id: u64,
    event: String,
    receiver: mpsc::UnboundedReceiver<Value>,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// 等待下一条负载；登记表被销毁后返回 `None`
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        if let Some(subscribers) = inner.subscribers.get_mut(&self.event) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                inner.subscribers.remove(&self.event);
            }
        }
    }
}
