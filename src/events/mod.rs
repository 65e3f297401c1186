//! Typed events emitted to the dashboard layer.
//!
//! All wire data is normalized into these value objects before it reaches
//! consumers. Raw frames must NEVER drive consumer logic directly.

mod stream_events;

pub use stream_events::{
    MarketUpdate,
    MidpointUpdate,
    OrderBookUpdate,
    PriceLevel,
    StreamEvent,
    TradeUpdate,
};
