//! Real-time market-data stream client.
//!
//! A persistent, auto-reconnecting, subscription-based link to a
//! JSON-over-WebSocket push-data server, feeding typed events to a
//! prediction-market dashboard.
//!
//! # Architecture
//!
//! - **Single execution context**: one driver task per client owns the
//!   connection state machine, subscription registry, pending-request table
//!   and outbound queue - no transitions ever interleave
//! - **Registry is truth**: the subscription registry holds desired state;
//!   the wire is a projection of it and reconverges after every reconnect
//! - **Graceful degradation**: a down link queues or records intent; decode
//!   failures are logged and dropped; the worst outcome is a terminal
//!   `reconnect_failed` requiring an explicit `connect()`
//!
//! # Usage
//!
//! ```no_run
//! use market_stream::{StreamClient, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, mut events) = StreamClient::new(StreamConfig::from_env());
//!     client.connect().unwrap();
//!     client.subscribe_market("some-market-id").unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {:?}", event.kind(), event);
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod utils;

// Re-export commonly used types
pub use client::{ConnectionState, StreamClient, SubmitStatus, SubscriptionAck};
pub use config::StreamConfig;
pub use error::StreamError;
pub use events::StreamEvent;
pub use protocol::{Channel, Subscription};
