//! Shared live socket connection.
//!
//! A [`SocketConnection`] is created without waiting for the handshake. A
//! background task owns the socket: it connects, flushes tracked
//! subscriptions on every open, fans inbound text out to attached handlers,
//! keeps the link alive with Ping frames, and reconnects with backoff.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::handlers::{HandlerId, HandlerReceiver, HandlerTable};
use crate::websocket::subscriptions::SubscriptionManager;
use crate::websocket::types::{
    ConnectionEvent, ConnectionState, InboundMessage, PriceSubscription, WsRequest,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection timeout duration for WebSocket connections
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Number of reconnect attempts before giving up
    pub reconnect_attempts: u32,
    /// Base delay for exponential backoff (ms)
    pub base_delay_ms: u64,
    /// Maximum delay for exponential backoff (ms)
    pub max_delay_ms: u64,
    /// Interval for client ping (seconds)
    pub ping_interval_secs: u64,
    /// Connection is considered dead if no pong arrives within this time (seconds)
    pub pong_timeout_secs: u64,
    /// Whether to automatically reconnect on disconnect
    pub auto_reconnect: bool,
    /// Whether to re-send tracked subscriptions after a reconnect
    pub auto_resubscribe: bool,
    /// Capacity of the event channel. Default: 1000
    pub event_channel_capacity: usize,
    /// Capacity of the command channel. Default: 100
    pub command_channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            auto_reconnect: true,
            auto_resubscribe: true,
            event_channel_capacity: 1000,
            command_channel_capacity: 100,
        }
    }
}

impl WebSocketConfig {
    /// Full jitter: uniform between 0 and the exponential delay, then capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let max_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jittered_delay = rand::thread_rng().gen_range(0..=max_delay);
        Duration::from_millis(jittered_delay.min(self.max_delay_ms))
    }
}

/// Internal command for the connection task
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Text frame intended for the socket generation `epoch`
    Send { text: String, epoch: u64 },
    Shutdown,
}

/// State shared between the public handle and the connection task.
///
/// Link status and tracked subscriptions live under one lock so that a
/// subscribe racing with an open is sent exactly once.
#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    /// Incremented on every successful open
    epoch: u64,
    subscriptions: SubscriptionManager,
}

pin_project! {
    /// Stream of lifecycle events for one connection.
    pub struct ConnectionEvents {
        #[pin]
        rx: mpsc::Receiver<ConnectionEvent>,
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.rx.poll_recv(cx)
    }
}

/// One live socket, shared by every subscription to the same URL.
#[derive(Debug)]
pub struct SocketConnection {
    url: String,
    config: WebSocketConfig,
    handlers: Arc<HandlerTable>,
    shared: Arc<Mutex<Shared>>,
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    /// Commands that did not fit in `cmd_tx`, forwarded in order
    overflow_tx: mpsc::UnboundedSender<ConnectionCommand>,
    overflow_len: Arc<AtomicUsize>,
    events: std::sync::Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    closed: Arc<AtomicBool>,
}

impl SocketConnection {
    /// Start a connection to `url`.
    ///
    /// Returns immediately; the handshake happens in a background task on the
    /// current tokio runtime.
    pub fn open(url: &str, config: WebSocketConfig) -> WsResult<Arc<Self>> {
        validate_url(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WebSocketError::ConnectionFailed(format!("no tokio runtime: {}", e)))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let connection = Arc::new(Self::with_channels(&runtime, url, config, cmd_tx, event_rx));

        let ctx = ConnectionContext {
            url: connection.url.clone(),
            config: connection.config.clone(),
            handlers: connection.handlers.clone(),
            shared: connection.shared.clone(),
            event_tx,
            closed: connection.closed.clone(),
        };
        runtime.spawn(connection_task(ctx, cmd_rx));

        tracing::info!(url = %url, "Opening shared socket connection");
        Ok(connection)
    }

    fn with_channels(
        runtime: &tokio::runtime::Handle,
        url: &str,
        config: WebSocketConfig,
        cmd_tx: mpsc::Sender<ConnectionCommand>,
        event_rx: mpsc::Receiver<ConnectionEvent>,
    ) -> Self {
        let (overflow_tx, overflow_rx) = mpsc::unbounded_channel();
        let overflow_len = Arc::new(AtomicUsize::new(0));
        runtime.spawn(forward_overflow(overflow_rx, cmd_tx.clone(), overflow_len.clone()));

        Self {
            url: url.to_string(),
            config,
            handlers: Arc::new(HandlerTable::new()),
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Connecting,
                epoch: 0,
                subscriptions: SubscriptionManager::new(),
            })),
            cmd_tx,
            overflow_tx,
            overflow_len,
            events: std::sync::Mutex::new(Some(event_rx)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A connection with no background task. Commands land on the returned
    /// receiver instead of a socket.
    #[cfg(test)]
    pub(crate) fn detached(
        url: &str,
        connected: bool,
    ) -> (Arc<Self>, mpsc::Receiver<ConnectionCommand>) {
        Self::detached_with_capacity(url, connected, 100)
    }

    #[cfg(test)]
    pub(crate) fn detached_with_capacity(
        url: &str,
        connected: bool,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ConnectionCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (_event_tx, event_rx) = mpsc::channel(1);
        let runtime = tokio::runtime::Handle::current();
        let connection =
            Self::with_channels(&runtime, url, WebSocketConfig::default(), cmd_tx, event_rx);
        if connected {
            if let Ok(mut shared) = connection.shared.try_lock() {
                shared.state = ConnectionState::Connected;
                shared.epoch = 1;
            }
        }
        (Arc::new(connection), cmd_rx)
    }

    /// Attach a message handler. Every inbound text frame is delivered to it.
    pub async fn attach(&self) -> (HandlerId, HandlerReceiver) {
        self.handlers.attach().await
    }

    /// Track a price subscription for `handler` and send it.
    ///
    /// If the socket is not open yet the message is sent as soon as it opens.
    pub async fn subscribe(
        &self,
        handler: HandlerId,
        subscription: PriceSubscription,
    ) -> WsResult<()> {
        let text = serde_json::to_string(&WsRequest::subscribe(subscription.clone()))?;

        let mut shared = self.shared.lock().await;
        shared.subscriptions.add(handler, subscription);
        if shared.state == ConnectionState::Connected {
            let epoch = shared.epoch;
            self.queue(vec![ConnectionCommand::Send { text, epoch }])?;
            tracing::info!(url = %self.url, handler = %handler, "Price subscription sent");
        } else {
            tracing::debug!(url = %self.url, handler = %handler, "Price subscription deferred until open");
        }
        Ok(())
    }

    /// Detach `handler` and drop its subscription.
    ///
    /// The unsubscribe message names no stream, so subscriptions still held by
    /// other handlers are re-sent right after it.
    pub async fn unsubscribe(&self, handler: HandlerId) -> WsResult<()> {
        self.handlers.detach(handler).await;

        let mut shared = self.shared.lock().await;
        if shared.subscriptions.remove(handler).is_none() {
            return Ok(());
        }
        if shared.state != ConnectionState::Connected {
            return Ok(());
        }

        let epoch = shared.epoch;
        let mut outbound = vec![WsRequest::unsubscribe()];
        outbound.extend(shared.subscriptions.subscribe_requests());
        let commands = outbound
            .iter()
            .map(|request| {
                serde_json::to_string(request).map(|text| ConnectionCommand::Send { text, epoch })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.queue(commands)?;
        tracing::info!(url = %self.url, handler = %handler, "Price subscription removed");
        Ok(())
    }

    /// Hand `commands` to the connection task in order.
    ///
    /// Once the bounded queue is full, the rest goes through the overflow
    /// forwarder, and so does everything after it until the overflow drains.
    /// Callers hold the `shared` lock, which keeps calls from interleaving.
    fn queue(&self, commands: Vec<ConnectionCommand>) -> WsResult<()> {
        let mut commands = commands.into_iter();

        if self.overflow_len.load(Ordering::Acquire) == 0 {
            for command in commands.by_ref() {
                match self.cmd_tx.try_send(command) {
                    Ok(()) => {}
                    Err(TrySendError::Full(command)) => {
                        tracing::warn!(url = %self.url, "Command queue full, spilling to overflow");
                        self.push_overflow(command)?;
                        break;
                    }
                    Err(TrySendError::Closed(_)) => return Err(WebSocketError::ChannelClosed),
                }
            }
        }

        for command in commands {
            self.push_overflow(command)?;
        }
        Ok(())
    }

    fn push_overflow(&self, command: ConnectionCommand) -> WsResult<()> {
        self.overflow_len.fetch_add(1, Ordering::AcqRel);
        self.overflow_tx.send(command).map_err(|_| {
            self.overflow_len.fetch_sub(1, Ordering::AcqRel);
            WebSocketError::ChannelClosed
        })
    }

    /// Route `text` to attached handlers, as if it arrived on the socket.
    pub async fn dispatch(&self, text: &str) -> usize {
        route_frame(&self.handlers, &self.shared, Arc::from(text)).await
    }

    /// Take the lifecycle event stream. Only the first call returns `Some`.
    pub fn take_events(&self) -> Option<ConnectionEvents> {
        let mut slot = match self.events.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take().map(|rx| ConnectionEvents { rx })
    }

    /// Ask the background task to close the socket and stop.
    pub async fn shutdown(&self) -> WsResult<()> {
        self.cmd_tx
            .send(ConnectionCommand::Shutdown)
            .await
            .map_err(|_| WebSocketError::ChannelClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// True once the background task has exited for good.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.len().await
    }

    pub async fn subscription_count(&self) -> usize {
        self.shared.lock().await.subscriptions.subscription_count()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

fn validate_url(url: &str) -> WsResult<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(WebSocketError::InvalidUrl(url.to_string()))
    }
}

/// Feed spilled commands into the bounded queue, waiting for room.
async fn forward_overflow(
    mut overflow_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(command) = overflow_rx.recv().await {
        let sent = cmd_tx.send(command).await.is_ok();
        pending.fetch_sub(1, Ordering::AcqRel);
        if !sent {
            tracing::debug!("Connection task gone, dropping overflow");
            break;
        }
    }
}

/// Deliver a frame to the handlers whose subscription matches its
/// `pair_address` and `resolution` tags.
///
/// Frames without tags, and frames that are not JSON, go to every handler.
async fn route_frame(handlers: &HandlerTable, shared: &Mutex<Shared>, text: Arc<str>) -> usize {
    let message = serde_json::from_str::<InboundMessage>(&text).ok();
    let (pair, resolution) = message
        .as_ref()
        .map_or((None, None), |m| (m.pair_address(), m.resolution()));

    let rejected = if pair.is_some() || resolution.is_some() {
        shared.lock().await.subscriptions.rejecting(pair, resolution)
    } else {
        Vec::new()
    };

    if rejected.is_empty() {
        handlers.dispatch(text).await
    } else {
        handlers
            .dispatch_where(text, |id| !rejected.contains(&id))
            .await
    }
}

// ============================================================================
// Connection task
// ============================================================================

struct ConnectionContext {
    url: String,
    config: WebSocketConfig,
    handlers: Arc<HandlerTable>,
    shared: Arc<Mutex<Shared>>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

impl ConnectionContext {
    /// Never blocks the connection task on a slow or absent consumer.
    fn emit(&self, event: ConnectionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::debug!(
                    "Event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        self.shared.lock().await.state = state;
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn connection_task(ctx: ConnectionContext, mut cmd_rx: mpsc::Receiver<ConnectionCommand>) {
    let mut attempt = 0u32;
    let mut opened_before = false;

    loop {
        match open_stream(&ctx.url).await {
            Ok(stream) => {
                attempt = 0;
                let (mut sink, source) = stream.split();
                let epoch = on_open(&ctx, &mut sink, !opened_before).await;
                opened_before = true;
                tracing::info!(url = %ctx.url, epoch, "Socket connected");
                ctx.emit(ConnectionEvent::Connected);

                match run_session(&ctx, sink, source, &mut cmd_rx, epoch).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => {
                        tracing::info!(url = %ctx.url, reason = %reason, "Socket disconnected");
                        ctx.set_state(ConnectionState::Reconnecting).await;
                        ctx.emit(ConnectionEvent::Disconnected { reason });
                    }
                }
            }
            Err(e) => {
                tracing::error!(url = %ctx.url, error = %e, "Socket connect failed");
                ctx.emit(ConnectionEvent::Error { error: e });
            }
        }

        if !ctx.config.auto_reconnect || attempt >= ctx.config.reconnect_attempts {
            tracing::error!(url = %ctx.url, attempts = attempt, "Giving up on socket");
            break;
        }

        attempt += 1;
        ctx.set_state(ConnectionState::Reconnecting).await;
        ctx.emit(ConnectionEvent::Reconnecting { attempt });
        let delay = ctx.config.backoff_delay(attempt);
        tracing::debug!(url = %ctx.url, attempt, delay_ms = delay.as_millis(), "Reconnecting");
        if !wait_or_shutdown(delay, &mut cmd_rx).await {
            break;
        }
    }

    ctx.set_state(ConnectionState::Closed).await;
    ctx.closed.store(true, Ordering::Release);
}

async fn open_stream(url: &str) -> WsResult<WsStream> {
    let (stream, _) = tokio::time::timeout(CONNECTION_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| WebSocketError::Timeout)?
        .map_err(WebSocketError::from)?;
    Ok(stream)
}

/// Flush tracked subscriptions and mark the link connected. Returns the new epoch.
async fn on_open(ctx: &ConnectionContext, sink: &mut WsSink, first_open: bool) -> u64 {
    let mut shared = ctx.shared.lock().await;
    shared.epoch += 1;

    if first_open || ctx.config.auto_resubscribe {
        for request in shared.subscriptions.subscribe_requests() {
            match serde_json::to_string(&request) {
                Ok(json) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        tracing::warn!("Failed to send subscription on open: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to encode subscription: {}", e),
            }
        }
    }

    shared.state = ConnectionState::Connected;
    shared.epoch
}

/// Sleep for `delay` while still honouring shutdown. Returns false on shutdown.
async fn wait_or_shutdown(delay: Duration, cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnectionCommand::Send { .. }) => {
                    tracing::debug!("Dropping send queued for a closed socket");
                }
                Some(ConnectionCommand::Shutdown) | None => return false,
            }
        }
    }
}

async fn run_session(
    ctx: &ConnectionContext,
    mut sink: WsSink,
    mut source: WsSource,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    epoch: u64,
) -> SessionEnd {
    let pong_timeout = Duration::from_secs(ctx.config.pong_timeout_secs);
    let mut ping_interval = interval(Duration::from_secs(ctx.config.ping_interval_secs.max(1)));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        route_frame(&ctx.handlers, &ctx.shared, Arc::from(text.as_str())).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            tracing::warn!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let close_code: u16 = frame.as_ref().map(|f| f.code.into()).unwrap_or(0);
                        if close_code == 1008 {
                            ctx.emit(ConnectionEvent::Error { error: WebSocketError::RateLimited });
                        }
                        let reason = frame
                            .as_ref()
                            .map(|f| format!("code: {}, reason: {}", f.code, f.reason))
                            .unwrap_or_else(|| "no reason".to_string());
                        return SessionEnd::Lost(reason);
                    }
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        let error = WebSocketError::from(e);
                        let reason = error.to_string();
                        ctx.emit(ConnectionEvent::Error { error });
                        return SessionEnd::Lost(reason);
                    }
                    None => return SessionEnd::Lost("Stream ended".to_string()),
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Send { text, epoch: target }) => {
                        if target != epoch {
                            tracing::debug!(stale_epoch = target, epoch, "Dropping send for a previous socket");
                            continue;
                        }
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!("Failed to send message: {}", e);
                        }
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client shutdown".into(),
                        }))).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > pong_timeout {
                    tracing::warn!("Pong timeout: no response received within {:?}", pong_timeout);
                    ctx.emit(ConnectionEvent::Error { error: WebSocketError::PingTimeout });
                    return SessionEnd::Lost("Ping timeout".to_string());
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    tracing::warn!("Failed to send periodic ping: {}", e);
                } else if !awaiting_pong {
                    awaiting_pong = true;
                    last_pong = Instant::now();
                }
            }
        }
    }
}
