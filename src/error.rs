//! Error taxonomy for the stream client.
//!
//! Transient connection failures are handled by the reconnect policy and
//! surface only as `Disconnected`/`ReconnectFailed` events; these errors are
//! what callers see on their own requests.

use thiserror::Error;

use crate::protocol::DecodeError;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Initial open never completed within the connect timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Heartbeat liveness lost; the connection was forcibly closed.
    #[error("stale connection, no liveness ack")]
    StaleConnection,

    /// Malformed incoming frame. Non-fatal: logged and dropped.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Failed to serialize an outgoing command.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// A correlated response never arrived within the request timeout.
    #[error("request timed out")]
    RequestTimeout,

    /// The connection was torn down while the request was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected a subscribe/unsubscribe.
    #[error("subscription rejected: {0}")]
    Subscription(String),

    /// Terminal: reconnect attempts exhausted. A new `connect()` call is
    /// required to resume.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    /// Underlying WebSocket transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The client's driver task is gone.
    #[error("client is shut down")]
    ClientClosed,
}
