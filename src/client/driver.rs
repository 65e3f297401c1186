//! Connection state machine.
//!
//! One driver task per client owns the physical link and every piece of
//! mutable state: registry, pending table, outbound queue. All transitions,
//! timer callbacks and frame handling are serialized here - nothing outside
//! this task mutates shared state.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::protocol::{decode, ClientCommand, ServerFrame, Subscription};

use super::pending::PendingRequests;
use super::queue::OutboundQueue;
use super::registry::SubscriptionRegistry;
use super::{Command, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// Close code used when heartbeat liveness is lost.
const STALE_CLOSE_CODE: u16 = 4000;
/// How often pending-request deadlines are checked while the link is open.
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
/// Wakeup period while there is nothing scheduled.
const IDLE_TICK: Duration = Duration::from_secs(60);

/// How an open session ended.
enum SessionEnd {
    /// Caller-initiated close (code 1000). Never reconnects.
    Clean { done: Option<oneshot::Sender<()>> },
    /// The link dropped; reconnection follows.
    Lost { code: u16, reason: String },
    /// The client handle was dropped; the driver exits.
    Shutdown,
}

enum OfflineOutcome {
    /// The retry deadline fired.
    Deadline,
    /// The caller asked to connect (again).
    Connect,
    /// The caller asked to stop; any scheduled retry is cancelled.
    Stopped,
    Shutdown,
}

pub(super) struct Driver {
    config: StreamConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<StreamEvent>,
    state_tx: watch::Sender<ConnectionState>,
    registry: SubscriptionRegistry,
    queue: OutboundQueue,
    pending: PendingRequests,
    next_message_id: u64,
}

impl Driver {
    pub(super) fn new(
        config: StreamConfig,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        event_tx: mpsc::Sender<StreamEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let queue = OutboundQueue::new(config.outbound_queue_cap);
        Self {
            config,
            cmd_rx,
            event_tx,
            state_tx,
            registry: SubscriptionRegistry::new(),
            queue,
            pending: PendingRequests::new(),
            next_message_id: 0,
        }
    }

    pub(super) async fn run(mut self) {
        'idle: loop {
            match self.wait_offline(None).await {
                OfflineOutcome::Connect => {}
                OfflineOutcome::Shutdown => return,
                OfflineOutcome::Deadline | OfflineOutcome::Stopped => continue 'idle,
            }

            // Consecutive failed connect attempts; reset on every open.
            let mut attempts: u32 = 0;

            'link: loop {
                self.set_state(ConnectionState::Connecting);
                let connect =
                    open_transport(self.config.ws_url.clone(), self.config.connect_timeout);
                tokio::pin!(connect);

                // Stay responsive to commands while the handshake runs.
                let result = loop {
                    tokio::select! {
                        result = &mut connect => break result,
                        cmd = self.cmd_rx.recv() => match cmd {
                            None => return,
                            Some(Command::Connect) => {}
                            Some(Command::Disconnect { done }) => {
                                self.pending.reject_all(|| StreamError::ConnectionClosed);
                                self.set_state(ConnectionState::Closed);
                                let _ = done.send(());
                                continue 'idle;
                            }
                            Some(cmd) => self.handle_offline_command(cmd),
                        },
                    }
                };

                match result {
                    Ok(ws) => {
                        attempts = 0;
                        match self.run_session(ws).await {
                            SessionEnd::Shutdown => return,
                            SessionEnd::Clean { done } => {
                                self.pending.reject_all(|| StreamError::ConnectionClosed);
                                self.set_state(ConnectionState::Closed);
                                self.emit(StreamEvent::disconnected(1000, "client disconnect"));
                                if let Some(done) = done {
                                    let _ = done.send(());
                                }
                                continue 'idle;
                            }
                            SessionEnd::Lost { code, reason } => {
                                self.pending.reject_all(|| StreamError::ConnectionClosed);
                                self.emit(StreamEvent::disconnected(code, reason));
                            }
                        }
                    }
                    Err(e) => {
                        attempts += 1;
                        warn!(attempt = attempts, error = %e, "connect attempt failed");
                        if attempts >= self.config.max_reconnect_attempts {
                            error!(attempts, "reconnect attempts exhausted, giving up");
                            self.set_state(ConnectionState::Failed);
                            self.emit(StreamEvent::reconnect_failed(attempts));
                            continue 'idle;
                        }
                    }
                }

                self.set_state(ConnectionState::Reconnecting);
                let delay = self.config.reconnect_delay(attempts + 1);
                info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = attempts + 1,
                    "scheduling reconnect"
                );
                match self.wait_offline(Some(Instant::now() + delay)).await {
                    OfflineOutcome::Deadline | OfflineOutcome::Connect => continue 'link,
                    OfflineOutcome::Stopped => continue 'idle,
                    OfflineOutcome::Shutdown => return,
                }
            }
        }
    }

    /// Waits while no link is up: serves registry mutations, queues
    /// correlated commands, expires pending deadlines, and honors an
    /// optional retry deadline.
    async fn wait_offline(&mut self, retry_at: Option<Instant>) -> OfflineOutcome {
        loop {
            let retry_sleep = retry_at.unwrap_or_else(|| Instant::now() + IDLE_TICK);
            let pending_sleep = self
                .pending
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_TICK);

            tokio::select! {
                _ = sleep_until(retry_sleep) => {
                    if retry_at.is_some() {
                        return OfflineOutcome::Deadline;
                    }
                }
                _ = sleep_until(pending_sleep) => {
                    let expired = self.pending.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "pending requests timed out while offline");
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return OfflineOutcome::Shutdown,
                    Some(Command::Connect) => return OfflineOutcome::Connect,
                    Some(Command::Disconnect { done }) => {
                        self.pending.reject_all(|| StreamError::ConnectionClosed);
                        self.set_state(ConnectionState::Closed);
                        let _ = done.send(());
                        return OfflineOutcome::Stopped;
                    }
                    Some(cmd) => self.handle_offline_command(cmd),
                },
            }
        }
    }

    /// Runs one open session until the link ends one way or another.
    async fn run_session(&mut self, mut ws: WsStream) -> SessionEnd {
        self.set_state(ConnectionState::Open);
        let mut last_ack = Instant::now();

        let flushed = self.flush_queue(&mut ws).await;
        self.replay_subscriptions(&mut ws, &flushed).await;
        self.emit(StreamEvent::connected());

        let mut heartbeat = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        let mut sweep = interval(PENDING_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        let _ = ws.close(None).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(cmd) => {
                        if let Some(end) = self.handle_open_command(&mut ws, cmd).await {
                            return end;
                        }
                    }
                },
                message = ws.next() => match message {
                    Some(Ok(message)) => {
                        if let Some(end) = self.handle_message(&mut ws, message, &mut last_ack).await {
                            return end;
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "websocket receive error");
                        return SessionEnd::Lost {
                            code: ABNORMAL_CLOSE_CODE,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        info!("websocket stream ended");
                        return SessionEnd::Lost {
                            code: ABNORMAL_CLOSE_CODE,
                            reason: "stream ended".to_string(),
                        };
                    }
                },
                _ = heartbeat.tick() => {
                    if last_ack.elapsed() > self.config.heartbeat_interval + self.config.heartbeat_timeout {
                        warn!("no liveness ack, closing stale connection");
                        let frame = CloseFrame {
                            code: CloseCode::from(STALE_CLOSE_CODE),
                            reason: "stale connection".into(),
                        };
                        let _ = ws.close(Some(frame)).await;
                        return SessionEnd::Lost {
                            code: STALE_CLOSE_CODE,
                            reason: "stale connection".to_string(),
                        };
                    }
                    let ping = ClientCommand::Ping {
                        timestamp: Utc::now().timestamp_millis(),
                    };
                    if let Err(e) = self.send_command(&mut ws, &ping).await {
                        error!(error = %e, "failed to send ping");
                        return SessionEnd::Lost {
                            code: ABNORMAL_CLOSE_CODE,
                            reason: e.to_string(),
                        };
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.pending.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "pending requests timed out");
                    }
                },
            }
        }
    }

    /// Handles a caller command while the link is open.
    async fn handle_open_command(&mut self, ws: &mut WsStream, cmd: Command) -> Option<SessionEnd> {
        match cmd {
            Command::Connect => {
                debug!("connect requested while already open");
            }
            Command::Disconnect { done } => {
                self.set_state(ConnectionState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                let _ = ws.close(Some(frame)).await;
                return Some(SessionEnd::Clean { done: Some(done) });
            }
            Command::Subscribe { subscription } => {
                // Idempotent: an already-present entry is not re-sent.
                if self.registry.add(subscription.clone()) {
                    let command = ClientCommand::Subscribe {
                        subscription,
                        message_id: None,
                    };
                    if let Err(e) = self.send_command(ws, &command).await {
                        warn!(error = %e, "subscribe send failed");
                        self.emit(StreamEvent::send_failed(e.to_string()));
                    }
                }
            }
            Command::Unsubscribe { subscription } => {
                if self.registry.remove(&subscription) {
                    let command = ClientCommand::Unsubscribe {
                        subscription,
                        message_id: None,
                    };
                    if let Err(e) = self.send_command(ws, &command).await {
                        warn!(error = %e, "unsubscribe send failed");
                        self.emit(StreamEvent::send_failed(e.to_string()));
                    }
                }
            }
            Command::UnsubscribeAll => {
                for subscription in self.registry.snapshot() {
                    let command = ClientCommand::Unsubscribe {
                        subscription,
                        message_id: None,
                    };
                    if let Err(e) = self.send_command(ws, &command).await {
                        warn!(error = %e, "unsubscribe send failed");
                        self.emit(StreamEvent::send_failed(e.to_string()));
                        break;
                    }
                }
                self.registry.clear();
            }
            Command::SubscribeWithAck {
                subscription,
                responder,
            } => {
                self.registry.add(subscription.clone());
                let id = self.allocate_message_id();
                self.pending.register(
                    id,
                    subscription.clone(),
                    Instant::now() + self.config.request_timeout,
                    responder,
                );
                let command = ClientCommand::Subscribe {
                    subscription,
                    message_id: Some(id),
                };
                if let Err(e) = self.send_command(ws, &command).await {
                    warn!(error = %e, "correlated subscribe send failed");
                    self.pending.resolve(id, Err(e));
                }
            }
        }
        None
    }

    /// Handles a caller command while no link is up. Registry mutations are
    /// recorded for replay; only correlated commands are queued for the
    /// flush (a plain subscribe is delivered by the replay itself, and a
    /// queued copy would duplicate it on the wire).
    fn handle_offline_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe { subscription } => {
                self.registry.add(subscription);
            }
            Command::Unsubscribe { subscription } => {
                // No connection to send on; the entry simply is not
                // replayed on the next reconnect.
                self.registry.remove(&subscription);
            }
            Command::UnsubscribeAll => self.registry.clear(),
            Command::SubscribeWithAck {
                subscription,
                responder,
            } => {
                self.registry.add(subscription.clone());
                let id = self.allocate_message_id();
                self.pending.register(
                    id,
                    subscription.clone(),
                    Instant::now() + self.config.request_timeout,
                    responder,
                );
                let queued = ClientCommand::Subscribe {
                    subscription,
                    message_id: Some(id),
                };
                if let Some(dropped) = self.queue.push(queued) {
                    warn!(?dropped, "outbound queue full, dropped oldest command");
                }
            }
            // Connect/Disconnect are consumed by the wait loops.
            Command::Connect => {}
            Command::Disconnect { done } => {
                let _ = done.send(());
            }
        }
    }

    /// Drains the outbound queue front-to-back. At-most-once: a command
    /// that fails to transmit is dropped, the remainder stays queued for
    /// the next open. Returns the subscriptions sent, so the replay can
    /// skip them.
    async fn flush_queue(&mut self, ws: &mut WsStream) -> HashSet<Subscription> {
        let mut sent = HashSet::new();
        while let Some(command) = self.queue.front().cloned() {
            match self.send_command(ws, &command).await {
                Ok(()) => {
                    self.queue.pop_front();
                    if command.is_subscribe() {
                        if let Some(subscription) = command.subscription() {
                            sent.insert(subscription.clone());
                        }
                    }
                }
                Err(e) => {
                    self.queue.pop_front();
                    warn!(error = %e, remaining = self.queue.len(), "queue flush failed");
                    self.emit(StreamEvent::send_failed(e.to_string()));
                    break;
                }
            }
        }
        sent
    }

    /// Issues one subscribe per registry entry, in registry order, skipping
    /// entries the queue flush already transmitted. The wire converges to
    /// the registry: exactly one subscribe per entry per open.
    async fn replay_subscriptions(&mut self, ws: &mut WsStream, already_sent: &HashSet<Subscription>) {
        let targets: Vec<Subscription> = self
            .registry
            .iter()
            .filter(|s| !already_sent.contains(*s))
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }
        info!(count = targets.len(), "replaying subscriptions");
        for subscription in targets {
            let command = ClientCommand::Subscribe {
                subscription,
                message_id: None,
            };
            if let Err(e) = self.send_command(ws, &command).await {
                warn!(error = %e, "resubscribe failed");
                self.emit(StreamEvent::send_failed(e.to_string()));
                break;
            }
        }
    }

    /// Handles one incoming WebSocket message.
    async fn handle_message(
        &mut self,
        ws: &mut WsStream,
        message: Message,
        last_ack: &mut Instant,
    ) -> Option<SessionEnd> {
        match message {
            Message::Text(text) => {
                match decode(text.as_str()) {
                    Ok(frame) => self.handle_frame(frame, last_ack),
                    Err(e) => {
                        // Non-fatal: logged and dropped.
                        debug!(error = %e, raw = %text, "dropping malformed frame");
                    }
                }
            }
            Message::Ping(payload) => {
                let _ = ws.send(Message::Pong(payload)).await;
                *last_ack = Instant::now();
            }
            Message::Pong(_) => {
                *last_ack = Instant::now();
            }
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((ABNORMAL_CLOSE_CODE, "closed without frame".to_string()));
                info!(code, %reason, "server closed connection");
                return Some(SessionEnd::Lost { code, reason });
            }
            Message::Binary(_) => {
                debug!("ignoring binary frame");
            }
            Message::Frame(_) => {}
        }
        None
    }

    /// Dispatches a decoded frame.
    fn handle_frame(&mut self, frame: ServerFrame, last_ack: &mut Instant) {
        match frame {
            ServerFrame::Pong(pong) => {
                debug!(timestamp = pong.timestamp, "pong");
                *last_ack = Instant::now();
            }
            ServerFrame::MarketData(frame) => {
                self.emit(StreamEvent::MarketUpdate(frame.into()));
            }
            ServerFrame::OrderBook(frame) => {
                self.emit(StreamEvent::OrderBookUpdate(frame.into()));
            }
            ServerFrame::Trade(frame) => {
                self.emit(StreamEvent::Trade(frame.into()));
            }
            ServerFrame::Midpoint(frame) => {
                self.emit(StreamEvent::MidpointUpdate(frame.into()));
            }
            ServerFrame::SubscriptionSuccess(ack) => {
                let resolved = match ack.message_id {
                    Some(id) => self.pending.resolve(id, Ok(())),
                    None => match (ack.channel, ack.subject()) {
                        (Some(channel), Some(subject)) => {
                            self.pending.resolve_matching(channel, subject, Ok(()))
                        }
                        _ => false,
                    },
                };
                if !resolved {
                    debug!("subscription ack without a pending request");
                }
            }
            ServerFrame::SubscriptionError(ack) => {
                let reason = ack
                    .error
                    .clone()
                    .unwrap_or_else(|| "subscription rejected".to_string());
                let resolved = match ack.message_id {
                    Some(id) => self
                        .pending
                        .resolve(id, Err(StreamError::Subscription(reason.clone()))),
                    None => match (ack.channel, ack.subject()) {
                        (Some(channel), Some(subject)) => self.pending.resolve_matching(
                            channel,
                            subject,
                            Err(StreamError::Subscription(reason.clone())),
                        ),
                        _ => false,
                    },
                };
                // The registry entry is left as the caller requested; a
                // rejected subscribe is not auto-retried here.
                if !resolved {
                    self.emit(StreamEvent::error(format!("subscription error: {reason}")));
                }
            }
            ServerFrame::ServerError(frame) => {
                warn!(error = %frame.error, "server error frame");
                self.emit(StreamEvent::error(frame.error));
            }
        }
    }

    async fn send_command(
        &self,
        ws: &mut WsStream,
        command: &ClientCommand,
    ) -> Result<(), StreamError> {
        let json = command.encode()?;
        debug!(%json, "sending");
        ws.send(Message::Text(json.into()))
            .await
            .map_err(StreamError::from)
    }

    fn emit(&self, event: StreamEvent) {
        // Non-blocking: a slow consumer must not stall the state machine.
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "failed to emit event");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            debug!(?state, "connection state");
            let _ = self.state_tx.send(state);
        }
    }

    fn allocate_message_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }
}

/// Opens the physical transport, bounded by the connect timeout.
async fn open_transport(url: String, connect_timeout: Duration) -> Result<WsStream, StreamError> {
    info!(%url, "connecting");
    match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(StreamError::Transport(e)),
        Err(_) => Err(StreamError::ConnectTimeout),
    }
}
