//! Reconnecting WebSocket channel to the assistant backend.
//!
//! Inbound frames are handled strictly in arrival order by the connection
//! task. Navigation commands are answered on the same socket before the next
//! frame is read; every other frame fans out to the registered observers.

use crate::navigation::NavigationGateway;
use futures_util::{FutureExt, SinkExt, StreamExt};
use gba_core::{
    wire::{
        encode, parse_inbound, ClientFrame, InboundFrame, NavigationCommand, NavigationResponse,
        OutboundQuery, WireError,
    },
    ConnectionState, Message, ModelConfig, NavigationResult,
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "ws://localhost:8000/ws";
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FrameObserver = Arc<dyn Fn(&InboundFrame) + Send + Sync>;
type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Linear backoff: attempt `n` waits `n * base_delay`, up to `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the 1-based `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    pub reconnect: ReconnectPolicy,
}

impl ChannelConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("realtime channel is not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Slots {
    closed: bool,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    config: ChannelConfig,
    gateway: Arc<NavigationGateway>,
    state: watch::Sender<ConnectionState>,
    slots: Mutex<Slots>,
    attempts: AtomicU32,
    next_observer: AtomicU64,
    frame_observers: Mutex<Vec<(ObserverId, FrameObserver)>>,
    state_observers: Mutex<Vec<(ObserverId, StateObserver)>>,
}

/// One logical connection to the backend. Owned by whoever created it; there
/// is no shared instance.
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    pub fn new(config: ChannelConfig, gateway: Arc<NavigationGateway>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                state,
                slots: Mutex::new(Slots::default()),
                attempts: AtomicU32::new(0),
                next_observer: AtomicU64::new(1),
                frame_observers: Mutex::new(Vec::new()),
                state_observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.config.url
    }

    pub fn gateway(&self) -> &Arc<NavigationGateway> {
        &self.inner.gateway
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Opens the transport. A no-op while already connected or connecting;
    /// cancels any pending automatic reconnect.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        {
            let mut slots = self.inner.slots();
            match self.state() {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            }
            slots.closed = false;
            if let Some(handle) = slots.reconnect.take() {
                handle.abort();
            }
            self.inner.attempts.store(0, Ordering::SeqCst);
            self.inner.publish_state(ConnectionState::Connecting);
        }
        self.inner.notify_state(ConnectionState::Connecting);
        match self.inner.open().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(event = "channel_connect_error", url = %self.inner.config.url, error = %err);
                self.inner.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Sends a chat query. `history` is the transcript before `query`.
    pub fn send_query(
        &self,
        query: &str,
        model_config: &ModelConfig,
        history: &[Message],
    ) -> Result<OutboundQuery, ChannelError> {
        let frame = OutboundQuery::build(query, history, model_config);
        self.inner.send_text(encode(&frame)?)?;
        Ok(frame)
    }

    pub fn send_test_connection(&self, model_config: &ModelConfig) -> Result<(), ChannelError> {
        let frame = ClientFrame::TestConnection {
            config: model_config.clone(),
        };
        self.inner.send_text(encode(&frame)?)
    }

    pub fn on_frame<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        lock(&self.inner.frame_observers).push((id, Arc::new(observer)));
        id
    }

    pub fn on_state_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        lock(&self.inner.state_observers).push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let frames = remove_by_id(&mut lock(&self.inner.frame_observers), id);
        let states = remove_by_id(&mut lock(&self.inner.state_observers), id);
        frames || states
    }

    pub fn clear_observers(&self) {
        lock(&self.inner.frame_observers).clear();
        lock(&self.inner.state_observers).clear();
    }

    /// Closes the transport and cancels any pending reconnect. Nothing is
    /// reopened until the next explicit `connect`.
    pub async fn close(&self) {
        let (outbound, connection) = self.inner.teardown();
        if let Some(outbound) = outbound {
            let _ = outbound.send(WsMessage::Close(None));
        }
        if let Some(mut handle) = connection {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!(event = "channel_closed", url = %self.inner.config.url);
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        let (_, connection) = self.inner.teardown();
        if let Some(handle) = connection {
            handle.abort();
        }
    }
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        lock(&self.slots)
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst))
    }

    fn is_closed(&self) -> bool {
        self.slots().closed
    }

    fn teardown(&self) -> (Option<mpsc::UnboundedSender<WsMessage>>, Option<JoinHandle<()>>) {
        let mut slots = self.slots();
        slots.closed = true;
        slots.generation += 1;
        if let Some(handle) = slots.reconnect.take() {
            handle.abort();
        }
        (slots.outbound.take(), slots.connection.take())
    }

    async fn open(self: &Arc<Self>) -> Result<(), ChannelError> {
        let (ws, _) = connect_async(self.config.url.clone())
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        match self.install(ws) {
            Ok((generation, changed)) => {
                if changed {
                    self.notify_state(ConnectionState::Connected);
                }
                info!(event = "channel_open", url = %self.config.url, generation = generation);
                Ok(())
            }
            Err(mut ws) => {
                let _ = ws.close(None).await;
                Err(ChannelError::Transport(
                    "channel closed while connecting".to_string(),
                ))
            }
        }
    }

    /// Hands a fresh socket to a new connection task unless the channel was
    /// closed meanwhile, in which case the socket is given back.
    fn install(self: &Arc<Self>, ws: WsStream) -> Result<(u64, bool), WsStream> {
        let mut slots = self.slots();
        if slots.closed {
            return Err(ws);
        }
        slots.generation += 1;
        let generation = slots.generation;
        let (tx, rx) = mpsc::unbounded_channel();
        slots.outbound = Some(tx);
        self.attempts.store(0, Ordering::SeqCst);
        let changed = self.publish_state(ConnectionState::Connected);
        let task = tokio::spawn(run_connection(self.clone(), ws, rx, generation));
        if let Some(previous) = slots.connection.replace(task) {
            previous.abort();
        }
        Ok((generation, changed))
    }

    fn send_text(&self, text: String) -> Result<(), ChannelError> {
        let state = *self.state.borrow();
        if state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected(state));
        }
        let outbound = self
            .slots()
            .outbound
            .clone()
            .ok_or(ChannelError::NotConnected(state))?;
        outbound
            .send(WsMessage::Text(text))
            .map_err(|_| ChannelError::Transport("connection writer is gone".to_string()))
    }

    fn set_state(&self, next: ConnectionState) {
        if self.publish_state(next) {
            self.notify_state(next);
        }
    }

    /// Updates the watched state without running observers; callers holding
    /// the slot lock notify after releasing it.
    fn publish_state(&self, next: ConnectionState) -> bool {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(event = "channel_state", from = %previous, to = %next);
        }
        previous != next
    }

    fn notify_state(&self, state: ConnectionState) {
        let observers: Vec<_> = lock(&self.state_observers).clone();
        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                error!(event = "state_observer_panicked", observer = id.0);
            }
        }
    }

    fn notify_frame(&self, frame: &InboundFrame) {
        let observers: Vec<_> = lock(&self.frame_observers).clone();
        if observers.is_empty() {
            debug!(event = "frame_unobserved");
        }
        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(frame))).is_err() {
                error!(event = "frame_observer_panicked", observer = id.0);
            }
        }
    }

    /// Handles one inbound text frame; returns the reply to write back, if any.
    async fn handle_text(&self, text: &str) -> Option<String> {
        let frame = match parse_inbound(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "frame_dropped", error = %err);
                return None;
            }
        };
        match frame {
            InboundFrame::Navigation(command) => Some(self.answer_navigation(command).await),
            InboundFrame::InvalidNavigation {
                request_id: Some(request_id),
                reason,
            } => {
                warn!(event = "navigation_rejected", request_id = %request_id, reason = %reason);
                Some(encode_navigation_response(NavigationResponse::error(
                    &request_id,
                    reason,
                )))
            }
            InboundFrame::InvalidNavigation {
                request_id: None,
                reason,
            } => {
                warn!(event = "navigation_unanswerable", reason = %reason);
                None
            }
            other => {
                self.notify_frame(&other);
                None
            }
        }
    }

    async fn answer_navigation(&self, command: NavigationCommand) -> String {
        info!(
            event = "navigation_command",
            request_id = %command.request_id,
            chromosome = %command.chromosome,
            start = command.start,
            end = command.end,
            gene = command.gene_name.as_deref().unwrap_or("")
        );
        let result = AssertUnwindSafe(self.gateway.navigate_to_location(
            &command.chromosome,
            command.start,
            command.end,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!(event = "navigation_panicked", request_id = %command.request_id);
            NavigationResult::failed("Navigation failed", Some("navigation panicked".to_string()))
        });
        let response = NavigationResponse::from_result(&command.request_id, &result);
        info!(
            event = "navigation_response",
            request_id = %command.request_id,
            success = result.success,
            message = %response.message
        );
        encode_navigation_response(response)
    }

    fn connection_closed(self: &Arc<Self>, generation: u64) {
        let mut slots = self.slots();
        if slots.generation != generation || slots.closed {
            return;
        }
        slots.outbound = None;
        slots.connection = None;
        warn!(event = "channel_lost", url = %self.config.url);
        let changed = self.publish_state(ConnectionState::Reconnecting);
        let inner = self.clone();
        let handle = tokio::spawn(async move { inner.reconnect_loop().await });
        if let Some(previous) = slots.reconnect.replace(handle) {
            previous.abort();
        }
        drop(slots);
        if changed {
            self.notify_state(ConnectionState::Reconnecting);
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let policy = self.config.reconnect;
        loop {
            let attempt = self.attempts.load(Ordering::SeqCst) + 1;
            let Some(delay) = policy.delay_for(attempt) else {
                error!(
                    event = "reconnect_exhausted",
                    attempts = policy.max_attempts,
                    url = %self.config.url
                );
                self.set_state(ConnectionState::Disconnected);
                return;
            };
            self.attempts.store(attempt, Ordering::SeqCst);
            info!(
                event = "reconnect_scheduled",
                attempt = attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64
            );
            tokio::time::sleep(delay).await;
            if self.is_closed() {
                return;
            }
            match self.open().await {
                Ok(()) => {
                    info!(event = "reconnect_ok", attempt = attempt);
                    return;
                }
                Err(err) => warn!(event = "reconnect_failed", attempt = attempt, error = %err),
            }
        }
    }
}

async fn run_connection(
    inner: Arc<Inner>,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    generation: u64,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(event = "frame_dropped", error = "binary frame is not utf-8");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(event = "channel_read_error", error = %err);
                        break;
                    }
                };
                if let Some(reply) = inner.handle_text(&text).await {
                    if let Err(err) = sink.send(WsMessage::Text(reply)).await {
                        warn!(event = "channel_write_error", error = %err);
                        break;
                    }
                }
            }
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else { break };
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(err) = sink.send(message).await {
                    warn!(event = "channel_write_error", error = %err);
                    break;
                }
                if closing {
                    break;
                }
            }
        }
    }
    inner.connection_closed(generation);
}

fn remove_by_id<T>(observers: &mut Vec<(ObserverId, T)>, id: ObserverId) -> bool {
    let before = observers.len();
    observers.retain(|(existing, _)| *existing != id);
    observers.len() != before
}

/// Never yields a frame without the `requestId`: if the full response cannot
/// be encoded, a bare error response for the same id goes out instead.
fn encode_navigation_response(response: NavigationResponse) -> String {
    let request_id = response.request_id.clone();
    match encode(&ClientFrame::NavigationResponse(response)) {
        Ok(text) => text,
        Err(err) => {
            error!(event = "navigation_response_encode", request_id = %request_id, error = %err);
            fallback_navigation_response(&request_id)
        }
    }
}

fn fallback_navigation_response(request_id: &str) -> String {
    serde_json::json!({
        "type": "navigation_response",
        "requestId": request_id,
        "status": "error",
        "message": "Navigation response could not be encoded"
    })
    .to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
