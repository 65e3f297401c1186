//! Stream client: a persistent, auto-reconnecting, subscription-based link
//! to the market-data push server.
//!
//! The `StreamClient` handle is cheap to clone and fully non-blocking; all
//! work happens on a single driver task that owns the connection state
//! machine, the subscription registry, the pending-request table and the
//! outbound queue. Events flow back to the caller over a bounded channel.

mod driver;
mod pending;
mod queue;
mod registry;

pub use pending::SubscriptionAck;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::StreamEvent;
use crate::protocol::{Channel, Subscription};

use driver::Driver;
use pending::AckResult;

/// Lifecycle of the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Reconnecting,
    /// Reconnect attempts exhausted; `connect()` is required to resume.
    Failed,
}

/// Whether a submitted command went straight to the wire or waits for the
/// next open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Sent,
    Queued,
}

/// Commands from the handle to the driver task.
pub(crate) enum Command {
    Connect,
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Subscribe {
        subscription: Subscription,
    },
    Unsubscribe {
        subscription: Subscription,
    },
    UnsubscribeAll,
    SubscribeWithAck {
        subscription: Subscription,
        responder: oneshot::Sender<AckResult>,
    },
}

/// Handle to one stream client instance.
#[derive(Clone)]
pub struct StreamClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl StreamClient {
    /// Creates a client and spawns its driver task. The returned receiver
    /// carries every emitted `StreamEvent`.
    pub fn new(config: StreamConfig) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver::new(config, cmd_rx, event_tx, state_tx);
        tokio::spawn(driver.run());

        (Self { cmd_tx, state_rx }, event_rx)
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Starts connecting. Non-blocking; progress is reported through the
    /// event stream. Also resumes a client that gave up reconnecting.
    pub fn connect(&self) -> Result<(), StreamError> {
        self.cmd_tx
            .send(Command::Connect)
            .map_err(|_| StreamError::ClientClosed)
    }

    /// Clean, caller-initiated close (code 1000). Never triggers
    /// reconnection. Resolves only after every timer is stopped and every
    /// pending request has been rejected with `ConnectionClosed`.
    pub async fn disconnect(&self) -> Result<(), StreamError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { done: done_tx })
            .map_err(|_| StreamError::ClientClosed)?;
        done_rx.await.map_err(|_| StreamError::ClientClosed)
    }

    pub fn subscribe_market(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.subscribe(Channel::Market, market_id)
    }

    pub fn subscribe_orderbook(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.subscribe(Channel::Orderbook, market_id)
    }

    pub fn subscribe_trades(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.subscribe(Channel::Trades, market_id)
    }

    pub fn subscribe_midpoint(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.subscribe(Channel::Midpoint, market_id)
    }

    pub fn subscribe_user(&self, address: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.subscribe(Channel::User, address)
    }

    pub fn unsubscribe_market(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.unsubscribe(Channel::Market, market_id)
    }

    pub fn unsubscribe_orderbook(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.unsubscribe(Channel::Orderbook, market_id)
    }

    pub fn unsubscribe_trades(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.unsubscribe(Channel::Trades, market_id)
    }

    pub fn unsubscribe_midpoint(&self, market_id: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.unsubscribe(Channel::Midpoint, market_id)
    }

    pub fn unsubscribe_user(&self, address: impl Into<String>) -> Result<SubmitStatus, StreamError> {
        self.unsubscribe(Channel::User, address)
    }

    /// Drops every registry entry, unsubscribing on the wire if open.
    pub fn unsubscribe_all(&self) -> Result<SubmitStatus, StreamError> {
        self.submit(Command::UnsubscribeAll)
    }

    /// Records the subscription on any channel.
    pub fn subscribe(
        &self,
        channel: Channel,
        subject: impl Into<String>,
    ) -> Result<SubmitStatus, StreamError> {
        self.submit(Command::Subscribe {
            subscription: Subscription::new(channel, subject),
        })
    }

    pub fn unsubscribe(
        &self,
        channel: Channel,
        subject: impl Into<String>,
    ) -> Result<SubmitStatus, StreamError> {
        self.submit(Command::Unsubscribe {
            subscription: Subscription::new(channel, subject),
        })
    }

    /// Correlated subscribe: resolves with the server's acknowledgment, or
    /// rejects with `RequestTimeout`, `Subscription(reason)` or
    /// `ConnectionClosed`.
    pub async fn subscribe_with_ack(
        &self,
        channel: Channel,
        subject: impl Into<String>,
    ) -> Result<SubscriptionAck, StreamError> {
        if self.state() == ConnectionState::Failed {
            return Err(StreamError::ReconnectExhausted);
        }
        let (responder, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SubscribeWithAck {
                subscription: Subscription::new(channel, subject),
                responder,
            })
            .map_err(|_| StreamError::ClientClosed)?;
        rx.await.map_err(|_| StreamError::ConnectionClosed)?
    }

    fn submit(&self, command: Command) -> Result<SubmitStatus, StreamError> {
        match self.state() {
            ConnectionState::Failed => Err(StreamError::ReconnectExhausted),
            state => {
                self.cmd_tx
                    .send(command)
                    .map_err(|_| StreamError::ClientClosed)?;
                Ok(if state == ConnectionState::Open {
                    SubmitStatus::Sent
                } else {
                    SubmitStatus::Queued
                })
            }
        }
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let (client, _events) = StreamClient::new(StreamConfig::default());
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_subscribe_while_idle_is_queued() {
        let (client, _events) = StreamClient::new(StreamConfig::default());
        let status = client.subscribe_market("mkt-1").unwrap();
        assert_eq!(status, SubmitStatus::Queued);
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_completes() {
        let (client, _events) = StreamClient::new(StreamConfig::default());
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
