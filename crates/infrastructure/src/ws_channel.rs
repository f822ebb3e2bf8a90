//! WebSocket 实时通道
//!
//! 后台任务负责连接、收发帧和断线重连。帧格式为 `{"event": ..., "data": ...}`，
//! 访问令牌通过 `?token=` 查询参数传递。重连后自动重新加入当前房间，
//! 并分发一次 `connect` 事件，由上层决定是否通过 REST 对账。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use application::{
    ChannelError, CredentialProvider, RealtimeChannel, RoomTracker, Subscription,
    SubscriptionRegistry, CONNECTED_EVENT,
};
use async_trait::async_trait;
use config::RealtimeConfig;
use domain::{ChannelFrame, ConnectionState, ConversationId};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::retry::Backoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsChannelOptions {
    pub url: String,
    pub backoff: Backoff,
    pub outbound_buffer: usize,
}

impl WsChannelOptions {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            url: config.url.clone(),
            backoff: Backoff::exponential(config.reconnect_base(), config.reconnect_max()),
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }
}

/// 连接任务与通道句柄共享的状态
struct Shared {
    registry: SubscriptionRegistry,
    state: watch::Sender<ConnectionState>,
    rooms: Mutex<RoomTracker>,
    outbound: Mutex<Option<mpsc::Sender<ChannelFrame>>>,
}

impl Shared {
    fn rooms(&self) -> MutexGuard<'_, RoomTracker> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<ChannelFrame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<ChannelFrame>(text) {
            Ok(frame) => {
                let delivered = self.registry.dispatch(&frame.event, &frame.data);
                debug!(event = %frame.event, delivered, "inbound frame dispatched");
            }
            Err(err) => warn!(error = %err, "dropping malformed frame"),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

pub struct WsRealtimeChannel {
    options: WsChannelOptions,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl WsRealtimeChannel {
    pub fn new(options: WsChannelOptions, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            credentials,
            shared: Arc::new(Shared {
                registry: SubscriptionRegistry::new(),
                state,
                rooms: Mutex::new(RoomTracker::new()),
                outbound: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.options.url).map_err(|e| ChannelError::transport(e.to_string()))?;
        if let Some(token) = self.credentials.bearer_token() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        Ok(url)
    }

    /// 在持有房间锁时取出出站队列，保证与重连时的重新加入互不遗漏
    async fn send_room_frames(&self, frames: Vec<ChannelFrame>, sender: Option<mpsc::Sender<ChannelFrame>>) {
        let Some(sender) = sender else {
            debug!(count = frames.len(), "channel offline, room frames deferred to reconnect");
            return;
        };
        for frame in frames {
            if sender.send(frame).await.is_err() {
                debug!("connection closed while sending room frame");
                return;
            }
        }
    }
}

#[async_trait]
impl RealtimeChannel for WsRealtimeChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        let url = self.endpoint()?;
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Ok(());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_connection(
            self.shared.clone(),
            url,
            self.options.clone(),
            shutdown_rx,
        ));
        *worker = Some(Worker { handle, shutdown });
        Ok(())
    }

    async fn disconnect(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if let Err(err) = worker.handle.await {
                warn!(error = %err, "connection task ended abnormally");
            }
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    async fn join_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        let (frames, sender) = {
            let mut rooms = self.shared.rooms();
            let frames = rooms.join(conversation_id);
            (frames, self.shared.outbound().clone())
        };
        self.send_room_frames(frames, sender).await;
        Ok(())
    }

    async fn leave_room(&self, conversation_id: &ConversationId) -> Result<(), ChannelError> {
        let (frames, sender) = {
            let mut rooms = self.shared.rooms();
            let frames: Vec<_> = rooms.leave(conversation_id).into_iter().collect();
            (frames, self.shared.outbound().clone())
        };
        self.send_room_frames(frames, sender).await;
        Ok(())
    }

    fn subscribe(&self, event: &str) -> Subscription {
        self.shared.registry.subscribe(event)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        let sender = self
            .shared
            .outbound()
            .clone()
            .ok_or(ChannelError::NotConnected)?;
        sender
            .send(ChannelFrame::new(event, payload))
            .await
            .map_err(|_| ChannelError::NotConnected)
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn active_room(&self) -> Option<ConversationId> {
        self.shared.rooms().active().cloned()
    }
}

impl Drop for WsRealtimeChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            let _ = worker.shutdown.send(true);
            worker.handle.abort();
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    url: Url,
    options: WsChannelOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;
    let mut ever_connected = false;

    loop {
        shared.state.send_replace(ConnectionState::Connecting);
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws, _response)) => {
                info!(host = url.host_str().unwrap_or_default(), "realtime channel connected");
                attempt = 0;
                let reconnect = std::mem::replace(&mut ever_connected, true);
                match session(&shared, ws, options.outbound_buffer, reconnect, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost => warn!("realtime connection lost"),
                }
            }
            Err(err) => warn!(error = %err, attempt, "realtime connection attempt failed"),
        }

        shared.state.send_replace(ConnectionState::Disconnected);
        attempt = attempt.saturating_add(1);
        let delay = options.backoff.jittered_delay_at(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    *shared.outbound() = None;
    shared.state.send_replace(ConnectionState::Disconnected);
    info!("realtime channel stopped");
}

async fn session(
    shared: &Shared,
    mut ws: WsStream,
    buffer: usize,
    reconnect: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (tx, mut rx) = mpsc::channel::<ChannelFrame>(buffer);
    {
        let rooms = shared.rooms();
        if let Some(frame) = rooms.rejoin_frame() {
            // 新队列必有空位
            let _ = tx.try_send(frame);
        }
        *shared.outbound() = Some(tx);
    }
    shared.state.send_replace(ConnectionState::Connected);
    shared
        .registry
        .dispatch(CONNECTED_EVENT, &json!({ "reconnect": reconnect }));

    let end = loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch_text(&text),
                Some(Ok(WsMessage::Close(_))) | None => break SessionEnd::Lost,
                Some(Err(err)) => {
                    warn!(error = %err, "realtime socket error");
                    break SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
            },
            Some(frame) = rx.recv() => {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(event = %frame.event, error = %err, "failed to serialize frame");
                        continue;
                    }
                };
                if let Err(err) = ws.send(WsMessage::Text(text.into())).await {
                    warn!(event = %frame.event, error = %err, "failed to send frame");
                    break SessionEnd::Lost;
                }
            }
            _ = shutdown.changed() => {
                let _ = ws.close(None).await;
                break SessionEnd::Shutdown;
            }
        }
    };

    *shared.outbound() = None;
    end
}
